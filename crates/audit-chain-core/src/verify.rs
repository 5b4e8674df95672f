//! Pure chain walking.
//!
//! [`ChainWalker`] consumes entries in ascending sequence order and stops at
//! the first inconsistency. It does no I/O, so the same logic verifies a
//! live store and an exported chain.

use crate::crypto::ChainHash;
use crate::entry::AuditLogEntry;
use crate::error::{BreakKind, ChainIntegrityError};
use crate::head::ChainHead;
use crate::types::{EntryId, TenantId};

/// Result of a completed walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkSummary {
    /// Entries checked by this walk.
    pub entries_checked: u64,
    /// The sequence after the last checked entry.
    pub next_sequence: u64,
    /// Hash of the last checked entry (or the checkpoint hash).
    pub tail_hash: ChainHash,
    /// Id of the last checked entry, if any was checked.
    pub tail_entry_id: Option<EntryId>,
}

/// Incremental verifier over one tenant's chain.
#[derive(Debug, Clone)]
pub struct ChainWalker {
    tenant_id: TenantId,
    next_sequence: u64,
    expected_previous: ChainHash,
    tail_entry_id: Option<EntryId>,
    entries_checked: u64,
}

impl ChainWalker {
    /// Walk from sequence 0.
    pub fn from_genesis(tenant_id: TenantId) -> Self {
        Self::from_checkpoint(tenant_id, 0, ChainHash::GENESIS)
    }

    /// Walk from `sequence`, trusting `previous_hash` as the hash of entry
    /// `sequence - 1`.
    pub fn from_checkpoint(tenant_id: TenantId, sequence: u64, previous_hash: ChainHash) -> Self {
        Self {
            tenant_id,
            next_sequence: sequence,
            expected_previous: previous_hash,
            tail_entry_id: None,
            entries_checked: 0,
        }
    }

    /// The sequence the next entry must have.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Entries accepted so far.
    pub fn entries_checked(&self) -> u64 {
        self.entries_checked
    }

    /// Check one entry and advance past it.
    pub fn check(&mut self, entry: &AuditLogEntry) -> Result<(), ChainIntegrityError> {
        let fail = |kind, sequence, expected_hash, actual_hash| ChainIntegrityError {
            entry_id: Some(entry.id),
            sequence,
            kind,
            expected_hash,
            actual_hash,
        };

        // A foreign row is as bad as a missing one.
        if entry.sequence != self.next_sequence || entry.tenant_id != self.tenant_id {
            return Err(fail(
                BreakKind::SequenceGap,
                self.next_sequence,
                self.expected_previous,
                entry.previous_entry_hash,
            ));
        }

        if entry.previous_entry_hash != self.expected_previous {
            return Err(fail(
                BreakKind::BrokenLink,
                entry.sequence,
                self.expected_previous,
                entry.previous_entry_hash,
            ));
        }

        let recomputed = entry.recompute_hash();
        if recomputed != entry.entry_hash {
            return Err(fail(
                BreakKind::HashMismatch,
                entry.sequence,
                recomputed,
                entry.entry_hash,
            ));
        }

        if entry.check_envelope().is_err() {
            return Err(fail(
                BreakKind::EnvelopeMismatch,
                entry.sequence,
                entry.entry_hash,
                entry.entry_hash,
            ));
        }

        self.expected_previous = entry.entry_hash;
        self.tail_entry_id = Some(entry.id);
        self.next_sequence += 1;
        self.entries_checked += 1;
        Ok(())
    }

    /// Reject a stored row at `sequence` that could not be decoded.
    ///
    /// Rows missing before it are reported first, as a gap.
    pub fn unreadable(&self, sequence: u64, entry_id: Option<EntryId>) -> ChainIntegrityError {
        let kind = if sequence == self.next_sequence {
            BreakKind::Corrupted
        } else {
            BreakKind::SequenceGap
        };
        ChainIntegrityError {
            entry_id,
            sequence: self.next_sequence,
            kind,
            expected_hash: self.expected_previous,
            actual_hash: ChainHash::GENESIS,
        }
    }

    /// Finish the walk, checking the result against a head snapshot.
    ///
    /// A head that claims more entries than were walked means entries were
    /// removed from the tail. A head whose hash disagrees with the walked
    /// tail means the head itself was tampered with.
    pub fn finish(self, head: Option<&ChainHead>) -> Result<WalkSummary, ChainIntegrityError> {
        if let Some(head) = head {
            if head.chain_length > self.next_sequence {
                return Err(ChainIntegrityError {
                    entry_id: head.last_entry_id,
                    sequence: self.next_sequence,
                    kind: BreakKind::Truncated,
                    expected_hash: head.last_entry_hash,
                    actual_hash: self.expected_previous,
                });
            }

            let id_differs = match (self.tail_entry_id, head.last_entry_id) {
                (Some(walked), Some(recorded)) => walked != recorded,
                _ => false,
            };
            if head.chain_length == self.next_sequence
                && (head.last_entry_hash != self.expected_previous || id_differs)
            {
                return Err(ChainIntegrityError {
                    entry_id: head.last_entry_id,
                    sequence: self.next_sequence.saturating_sub(1),
                    kind: BreakKind::HeadMismatch,
                    expected_hash: self.expected_previous,
                    actual_hash: head.last_entry_hash,
                });
            }
        }

        Ok(WalkSummary {
            entries_checked: self.entries_checked,
            next_sequence: self.next_sequence,
            tail_hash: self.expected_previous,
            tail_entry_id: self.tail_entry_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use crate::entry::ChainPosition;
    use crate::event::AuditEvent;
    use crate::taxonomy::{Action, Resource};
    use bytes::Bytes;

    fn tenant() -> TenantId {
        TenantId::new("walker").unwrap()
    }

    fn build_chain(n: usize) -> (Vec<AuditLogEntry>, ChainHead) {
        let mut head = ChainHead::genesis(tenant(), 0);
        let mut entries = Vec::new();
        for i in 0..n {
            let event = AuditEvent::for_action(Action::DataUpdated, Resource::User, format!("u-{}", i));
            let tail_ts = entries.last().map(|e: &AuditLogEntry| e.timestamp);
            let entry = AuditLogEntry::seal(
                &tenant(),
                &canonicalize(&event).unwrap(),
                ChainPosition::after(&head, tail_ts, 1000 + i as i64),
            );
            head = head.advanced_to(&entry, entry.timestamp);
            entries.push(entry);
        }
        (entries, head)
    }

    fn walk(entries: &[AuditLogEntry], head: &ChainHead) -> Result<WalkSummary, ChainIntegrityError> {
        let mut walker = ChainWalker::from_genesis(tenant());
        for entry in entries {
            walker.check(entry)?;
        }
        walker.finish(Some(head))
    }

    #[test]
    fn test_valid_chain() {
        let (entries, head) = build_chain(5);
        let summary = walk(&entries, &head).unwrap();
        assert_eq!(summary.entries_checked, 5);
        assert_eq!(summary.tail_hash, head.last_entry_hash);
    }

    #[test]
    fn test_empty_chain() {
        let head = ChainHead::genesis(tenant(), 0);
        let summary = walk(&[], &head).unwrap();
        assert_eq!(summary.entries_checked, 0);
        assert!(summary.tail_hash.is_genesis());
    }

    #[test]
    fn test_hash_flip_reported_at_entry() {
        let (mut entries, head) = build_chain(4);
        let mut bytes = entries[2].entry_hash.0;
        bytes[0] ^= 0xff;
        entries[2].entry_hash = ChainHash(bytes);

        let err = walk(&entries, &head).unwrap_err();
        assert_eq!(err.kind, BreakKind::HashMismatch);
        assert_eq!(err.sequence, 2);
        assert_eq!(err.entry_id, Some(entries[2].id));
    }

    #[test]
    fn test_payload_flip_reported_at_entry() {
        let (mut entries, head) = build_chain(4);
        let mut bytes = entries[1].canonical_payload.to_vec();
        bytes[5] ^= 0x01;
        entries[1].canonical_payload = Bytes::from(bytes);

        let err = walk(&entries, &head).unwrap_err();
        assert_eq!(err.kind, BreakKind::HashMismatch);
        assert_eq!(err.sequence, 1);
    }

    #[test]
    fn test_gap_detected() {
        let (mut entries, head) = build_chain(4);
        entries.remove(1);
        let err = walk(&entries, &head).unwrap_err();
        assert_eq!(err.kind, BreakKind::SequenceGap);
        assert_eq!(err.sequence, 1);
    }

    #[test]
    fn test_truncation_detected() {
        let (mut entries, head) = build_chain(4);
        entries.pop();
        let err = walk(&entries, &head).unwrap_err();
        assert_eq!(err.kind, BreakKind::Truncated);
        assert_eq!(err.sequence, 3);
    }

    #[test]
    fn test_checkpoint_walk() {
        let (entries, head) = build_chain(6);
        let mut walker = ChainWalker::from_checkpoint(tenant(), 3, entries[2].entry_hash);
        for entry in &entries[3..] {
            walker.check(entry).unwrap();
        }
        let summary = walker.finish(Some(&head)).unwrap();
        assert_eq!(summary.entries_checked, 3);
    }

    #[test]
    fn test_unreadable_row() {
        let (entries, _) = build_chain(3);
        let mut walker = ChainWalker::from_genesis(tenant());
        walker.check(&entries[0]).unwrap();

        let err = walker.unreadable(1, Some(entries[1].id));
        assert_eq!(err.kind, BreakKind::Corrupted);
        assert_eq!(err.sequence, 1);
        assert_eq!(err.expected_hash, entries[0].entry_hash);

        // Row 1 is missing entirely; the gap comes first.
        let err = walker.unreadable(2, Some(entries[2].id));
        assert_eq!(err.kind, BreakKind::SequenceGap);
        assert_eq!(err.sequence, 1);
    }

    #[test]
    fn test_head_mismatch_detected() {
        let (entries, mut head) = build_chain(3);
        head.last_entry_hash = ChainHash::hash(b"forged");
        let err = walk(&entries, &head).unwrap_err();
        assert_eq!(err.kind, BreakKind::HeadMismatch);
    }
}
