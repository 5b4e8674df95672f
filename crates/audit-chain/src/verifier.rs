//! Verification: re-derive every link from durable storage.
//!
//! Verification reads a head snapshot first and then only looks at entries
//! below it, so it can run while appends continue. The result is recorded
//! as verification metadata, which lives apart from the head and never
//! bumps its version.

use serde::{Deserialize, Serialize};

use audit_chain_core::{
    BreakKind, ChainHash, ChainHead, ChainIntegrityError, ChainWalker, EntryId, TenantId,
    VerificationMetadata, VerificationStatus,
};
use audit_chain_store::{Store, StoreError};

use crate::error::{AuditError, Result};
use crate::log::{now_millis, AuditLog};

/// Outcome of verifying one tenant's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub tenant_id: TenantId,
    /// `Valid` or `Broken`.
    pub status: VerificationStatus,
    /// First sequence that was checked.
    pub from_sequence: u64,
    /// Entries checked and found consistent.
    pub entries_verified: u64,
    /// Chain length of the head snapshot the walk was bounded by.
    pub chain_length: u64,
    /// Tail hash of the head snapshot.
    pub head_hash: ChainHash,
    /// When verification ran (Unix ms).
    pub verified_at: i64,
    /// The first inconsistency, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ChainIntegrityError>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Valid
    }

    pub fn broken_at_entry_id(&self) -> Option<EntryId> {
        self.failure.as_ref().and_then(|f| f.entry_id)
    }

    pub fn broken_at_sequence(&self) -> Option<u64> {
        self.failure.as_ref().map(|f| f.sequence)
    }

    pub fn expected_hash(&self) -> Option<ChainHash> {
        self.failure.as_ref().map(|f| f.expected_hash)
    }

    pub fn actual_hash(&self) -> Option<ChainHash> {
        self.failure.as_ref().map(|f| f.actual_hash)
    }

    /// Turn a broken report into [`AuditError::ChainIntegrity`].
    pub fn ensure_valid(self) -> Result<Self> {
        match self.failure {
            Some(failure) => Err(AuditError::ChainIntegrity(failure)),
            None => Ok(self),
        }
    }

    fn metadata(&self) -> VerificationMetadata {
        VerificationMetadata {
            tenant_id: self.tenant_id.clone(),
            status: self.status,
            last_verified_at: Some(self.verified_at),
            broken_at_entry_id: self.broken_at_entry_id(),
            broken_at_sequence: self.broken_at_sequence(),
            entries_verified: self.entries_verified,
        }
    }
}

impl<S: Store> AuditLog<S> {
    /// Verify a tenant's chain from `from_sequence` to the current head.
    ///
    /// `from_sequence = 0` checks the whole chain. A later start trusts the
    /// stored hash of entry `from_sequence - 1`. The walk stops at the first
    /// inconsistency. Integrity failures are reported, not returned as
    /// errors; use [`VerificationReport::ensure_valid`] for that.
    pub async fn verify(&self, tenant_id: &TenantId, from_sequence: u64) -> Result<VerificationReport> {
        let verified_at = now_millis();
        let head = self
            .store
            .get_head(tenant_id)
            .await?
            .unwrap_or_else(|| ChainHead::genesis(tenant_id.clone(), verified_at));

        if from_sequence > head.chain_length {
            return Err(AuditError::InvalidRange(format!(
                "cannot verify from sequence {}: chain {} has {} entries",
                from_sequence, tenant_id, head.chain_length
            )));
        }

        let (entries_verified, outcome) = self.walk(tenant_id, &head, from_sequence).await?;

        let report = VerificationReport {
            tenant_id: tenant_id.clone(),
            status: if outcome.is_ok() {
                VerificationStatus::Valid
            } else {
                VerificationStatus::Broken
            },
            from_sequence,
            entries_verified,
            chain_length: head.chain_length,
            head_hash: head.last_entry_hash,
            verified_at,
            failure: outcome.err(),
        };

        match &report.failure {
            None => tracing::info!(
                tenant = %tenant_id,
                from_sequence,
                entries = entries_verified,
                "audit chain verified"
            ),
            Some(failure) => tracing::error!(
                tenant = %tenant_id,
                sequence = failure.sequence,
                kind = failure.kind.as_str(),
                entry = ?failure.entry_id,
                expected = %failure.expected_hash,
                actual = %failure.actual_hash,
                "AUDIT CHAIN INTEGRITY FAILURE"
            ),
        }

        self.store.put_verification(&report.metadata()).await?;
        Ok(report)
    }

    /// Verify every tenant's chain from genesis.
    pub async fn verify_all(&self) -> Result<Vec<VerificationReport>> {
        let mut reports = Vec::new();
        for tenant_id in self.store.list_tenants().await? {
            reports.push(self.verify(&tenant_id, 0).await?);
        }
        Ok(reports)
    }

    /// The last recorded verification of a tenant's chain.
    pub async fn verification_status(&self, tenant_id: &TenantId) -> Result<VerificationMetadata> {
        Ok(self
            .store
            .get_verification(tenant_id)
            .await?
            .unwrap_or_else(|| VerificationMetadata::unverified(tenant_id.clone())))
    }

    /// Walk entries `[from_sequence, head.chain_length)` in pages.
    ///
    /// Storage errors abort the walk; integrity failures end it. A row the
    /// store cannot decode is an integrity failure at its sequence.
    async fn walk(
        &self,
        tenant_id: &TenantId,
        head: &ChainHead,
        from_sequence: u64,
    ) -> Result<(u64, std::result::Result<(), ChainIntegrityError>)> {
        let mut walker = if from_sequence == 0 {
            ChainWalker::from_genesis(tenant_id.clone())
        } else {
            match self
                .store
                .get_entry_by_sequence(tenant_id, from_sequence - 1)
                .await
            {
                Ok(Some(anchor)) => {
                    ChainWalker::from_checkpoint(tenant_id.clone(), from_sequence, anchor.entry_hash)
                }
                Err(StoreError::CorruptEntry {
                    sequence, entry_id, ..
                }) => {
                    return Ok((
                        0,
                        Err(ChainIntegrityError {
                            entry_id,
                            sequence,
                            kind: BreakKind::Corrupted,
                            expected_hash: head.last_entry_hash,
                            actual_hash: ChainHash::GENESIS,
                        }),
                    ));
                }
                Err(e) => return Err(e.into()),
                Ok(None) => {
                    // Nothing to anchor the walk to.
                    return Ok((
                        0,
                        Err(ChainIntegrityError {
                            entry_id: None,
                            sequence: from_sequence - 1,
                            kind: BreakKind::SequenceGap,
                            expected_hash: head.last_entry_hash,
                            actual_hash: ChainHash::GENESIS,
                        }),
                    ));
                }
            }
        };

        let page_size = self.config.verify_page_size.max(1);
        let end = head.chain_length;

        while walker.next_sequence() < end {
            let page = match self
                .store
                .get_entries_range(tenant_id, walker.next_sequence(), end, page_size)
                .await
            {
                Ok(page) => page,
                Err(StoreError::CorruptEntry {
                    sequence, entry_id, ..
                }) => {
                    // The readable rows below it still come first.
                    let readable = self
                        .store
                        .get_entries_range(tenant_id, walker.next_sequence(), sequence, page_size)
                        .await?;
                    for entry in &readable {
                        if let Err(failure) = walker.check(entry) {
                            return Ok((walker.entries_checked(), Err(failure)));
                        }
                    }
                    let failure = walker.unreadable(sequence, entry_id);
                    return Ok((walker.entries_checked(), Err(failure)));
                }
                Err(e) => return Err(e.into()),
            };
            if page.is_empty() {
                break;
            }
            for entry in &page {
                if let Err(failure) = walker.check(entry) {
                    return Ok((walker.entries_checked(), Err(failure)));
                }
            }
        }

        let checked = walker.entries_checked();
        Ok((checked, walker.finish(Some(head)).map(|_| ())))
    }
}
