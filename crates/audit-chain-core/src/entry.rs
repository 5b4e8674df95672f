//! Audit log entries: the immutable, chained records.
//!
//! An entry is produced once by [`AuditLogEntry::seal`] and never modified
//! after commit. The taxonomy fields are duplicated out of the payload so
//! stores can index and filter them; the payload stays the authority and
//! verification checks that both agree.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{decode_event, open_payload, seal_payload, CanonicalEvent, PayloadEnvelope};
use crate::crypto::{digest, ChainHash};
use crate::error::CoreError;
use crate::event::AuditEvent;
use crate::head::ChainHead;
use crate::taxonomy::{Action, Category, Outcome, Resource, Severity};
use crate::types::{EntryId, TenantId};

/// Where a new entry goes in its tenant's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPosition {
    pub sequence: u64,
    pub previous_hash: ChainHash,
    pub timestamp: i64,
}

impl ChainPosition {
    /// The position right after `head`.
    ///
    /// `tail_timestamp` is the commit time of the current tail; the new
    /// timestamp never goes below it even if the local clock stepped back.
    pub fn after(head: &ChainHead, tail_timestamp: Option<i64>, now: i64) -> Self {
        Self {
            sequence: head.next_sequence(),
            previous_hash: head.last_entry_hash,
            timestamp: tail_timestamp.map_or(now, |t| t.max(now)),
        }
    }
}

/// A committed audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique id, assigned when sealed.
    pub id: EntryId,

    /// Owning tenant.
    pub tenant_id: TenantId,

    /// Position in the tenant's chain, starting at 0.
    pub sequence: u64,

    pub category: Category,
    pub action: Action,
    pub resource: Resource,
    pub resource_id: String,
    pub actor_id: Option<String>,
    pub correlation_id: Option<String>,
    pub severity: Severity,
    pub outcome: Outcome,

    /// Canonicalization version of the payload.
    pub schema_version: u16,

    /// The exact bytes that were hashed.
    pub canonical_payload: Bytes,

    /// `digest(previous_entry_hash, canonical_payload)`.
    pub entry_hash: ChainHash,

    /// Hash of entry `sequence - 1`, or genesis.
    pub previous_entry_hash: ChainHash,

    /// Commit time (Unix ms).
    pub timestamp: i64,
}

impl AuditLogEntry {
    /// Build the entry for `event` at `position`, hashing it into the chain.
    pub fn seal(tenant_id: &TenantId, event: &CanonicalEvent, position: ChainPosition) -> Self {
        let payload = seal_payload(
            tenant_id.as_str(),
            position.sequence,
            position.timestamp,
            event,
        );
        let entry_hash = digest(&position.previous_hash, &payload);
        let e = event.event();

        Self {
            id: EntryId::generate(),
            tenant_id: tenant_id.clone(),
            sequence: position.sequence,
            category: e.category,
            action: e.action,
            resource: e.resource,
            resource_id: e.resource_id.clone(),
            actor_id: e.actor_id.clone(),
            correlation_id: e.correlation_id.clone(),
            severity: e.severity,
            outcome: e.outcome,
            schema_version: event.schema_version(),
            canonical_payload: Bytes::from(payload),
            entry_hash,
            previous_entry_hash: position.previous_hash,
            timestamp: position.timestamp,
        }
    }

    /// Recompute the link hash from the stored fields.
    pub fn recompute_hash(&self) -> ChainHash {
        digest(&self.previous_entry_hash, &self.canonical_payload)
    }

    /// Whether the stored hash matches the recomputation.
    pub fn verify_hash(&self) -> bool {
        self.recompute_hash() == self.entry_hash
    }

    /// Whether this is the first entry of its chain.
    pub fn is_genesis(&self) -> bool {
        self.sequence == 0 && self.previous_entry_hash.is_genesis()
    }

    /// Decode the sealed payload envelope.
    pub fn envelope(&self) -> Result<PayloadEnvelope, CoreError> {
        open_payload(&self.canonical_payload)
    }

    /// Decode the full event, including details, from the payload.
    pub fn event(&self) -> Result<AuditEvent, CoreError> {
        let envelope = self.envelope()?;
        decode_event(&envelope.event).map(|(_, event)| event)
    }

    /// Check that the sealed payload agrees with the row's own columns.
    ///
    /// Returns a description of the first disagreement.
    pub fn check_envelope(&self) -> Result<(), String> {
        let envelope = self.envelope().map_err(|e| e.to_string())?;

        if envelope.tenant_id != self.tenant_id.as_str() {
            return Err(format!("payload tenant {:?}", envelope.tenant_id));
        }
        if envelope.sequence != self.sequence {
            return Err(format!("payload sequence {}", envelope.sequence));
        }
        if envelope.timestamp != self.timestamp {
            return Err(format!("payload timestamp {}", envelope.timestamp));
        }
        if envelope.schema_version != self.schema_version {
            return Err(format!("payload schema version {}", envelope.schema_version));
        }

        let (event_version, event) = decode_event(&envelope.event).map_err(|e| e.to_string())?;
        if event_version != envelope.schema_version {
            return Err(format!("event schema version {}", event_version));
        }

        let matches = event.category == self.category
            && event.action == self.action
            && event.resource == self.resource
            && event.resource_id == self.resource_id
            && event.actor_id == self.actor_id
            && event.correlation_id == self.correlation_id
            && event.severity == self.severity
            && event.outcome == self.outcome;
        if !matches {
            return Err("taxonomy columns differ from payload".into());
        }

        Ok(())
    }
}
