//! Appending: canonicalize, link, compare-and-swap, retry.
//!
//! The head is only a cache of the entry table. Before every commit the
//! appender re-reads the latest stored entry; if it finds entries the head
//! does not cover (a commit that crashed between insert and head update) it
//! proves they extend the head and adopts them, or refuses to go on.

use audit_chain_core::{
    canonicalize, AuditEvent, AuditLogEntry, ChainHead, ChainPosition, ChainWalker, RawAuditEvent,
    TenantId,
};
use audit_chain_store::{CommitOutcome, Store, StoreExt};

use crate::error::{AuditError, Result};
use crate::log::{now_millis, AuditLog};

/// State of a head after reconciling it with the entry table.
enum Reconciled {
    /// Safe to build on.
    Ready {
        head: ChainHead,
        tail_timestamp: Option<i64>,
    },
    /// Another writer moved the head while we were looking.
    Moved,
}

impl<S: Store> AuditLog<S> {
    /// Append an event to a tenant's chain.
    ///
    /// Returns once the entry is durably chained. The event is canonicalized
    /// once; only the chain position is recomputed on retry.
    pub async fn append(&self, tenant_id: &TenantId, event: AuditEvent) -> Result<AuditLogEntry> {
        let canonical = canonicalize(&event)?;
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let head = self.store.init_head(tenant_id, now_millis()).await?;

            let (head, tail_timestamp) = match self.reconcile(tenant_id, head).await? {
                Reconciled::Ready {
                    head,
                    tail_timestamp,
                } => (head, tail_timestamp),
                Reconciled::Moved => {
                    tracing::debug!(tenant = %tenant_id, attempt, "head moved during recovery");
                    self.backoff(attempt, max_attempts).await;
                    continue;
                }
            };

            let position = ChainPosition::after(&head, tail_timestamp, now_millis());
            let entry = AuditLogEntry::seal(tenant_id, &canonical, position);

            match self.store.commit_entry(&entry, head.version).await? {
                CommitOutcome::Committed(new_head) => {
                    tracing::debug!(
                        tenant = %tenant_id,
                        sequence = entry.sequence,
                        version = new_head.version,
                        attempt,
                        "appended audit entry"
                    );
                    return Ok(entry);
                }
                CommitOutcome::VersionConflict { current_version } => {
                    tracing::debug!(
                        tenant = %tenant_id,
                        attempt,
                        expected = head.version,
                        current = current_version,
                        "lost head compare-and-swap"
                    );
                }
                CommitOutcome::SequenceTaken { existing } => {
                    tracing::debug!(
                        tenant = %tenant_id,
                        attempt,
                        sequence = entry.sequence,
                        existing = %existing,
                        "sequence already taken"
                    );
                }
            }

            self.backoff(attempt, max_attempts).await;
        }

        tracing::warn!(
            tenant = %tenant_id,
            attempts = max_attempts,
            "giving up append after repeated head contention"
        );
        Err(AuditError::ChainContention {
            tenant_id: tenant_id.clone(),
            attempts: max_attempts,
        })
    }

    /// Append a string-typed event, validating it against the taxonomy.
    pub async fn append_raw(&self, tenant_id: &TenantId, raw: RawAuditEvent) -> Result<AuditLogEntry> {
        let event = AuditEvent::try_from(raw)?;
        self.append(tenant_id, event).await
    }

    async fn backoff(&self, attempt: u32, max_attempts: u32) {
        if attempt < max_attempts {
            tokio::time::sleep(self.config.retry.delay_for(attempt)).await;
        }
    }

    /// Check `head` against the stored tail, adopting orphans if needed.
    async fn reconcile(&self, tenant_id: &TenantId, head: ChainHead) -> Result<Reconciled> {
        let inconsistent = |reason: String| AuditError::InconsistentHead {
            tenant_id: tenant_id.clone(),
            reason,
        };

        let Some(tail) = self.store.latest_entry(tenant_id).await? else {
            if head.is_genesis() {
                return Ok(Reconciled::Ready {
                    head,
                    tail_timestamp: None,
                });
            }
            return Err(inconsistent(format!(
                "head claims {} entries but none are stored",
                head.chain_length
            )));
        };

        let covered = tail.sequence + 1;
        if covered == head.chain_length {
            if !head.points_at(&tail) {
                return Err(inconsistent(format!(
                    "head does not point at stored tail {} (sequence {})",
                    tail.id, tail.sequence
                )));
            }
            return Ok(Reconciled::Ready {
                head,
                tail_timestamp: Some(tail.timestamp),
            });
        }

        if covered < head.chain_length {
            return Err(inconsistent(format!(
                "head claims {} entries but the stored chain ends at sequence {}",
                head.chain_length, tail.sequence
            )));
        }

        self.adopt_orphans(tenant_id, head, tail.sequence).await
    }

    /// Prove that the entries after `head` up to `last_sequence` extend it,
    /// then move the head onto the last one.
    async fn adopt_orphans(
        &self,
        tenant_id: &TenantId,
        head: ChainHead,
        last_sequence: u64,
    ) -> Result<Reconciled> {
        let orphans = self
            .store
            .collect_entries(
                tenant_id,
                head.chain_length,
                last_sequence + 1,
                self.config.query_page_size,
            )
            .await?;

        let mut walker =
            ChainWalker::from_checkpoint(tenant_id.clone(), head.chain_length, head.last_entry_hash);
        for orphan in &orphans {
            if let Err(e) = walker.check(orphan) {
                tracing::error!(
                    tenant = %tenant_id,
                    sequence = e.sequence,
                    kind = e.kind.as_str(),
                    "refusing to adopt unprovable entry"
                );
                return Err(AuditError::InconsistentHead {
                    tenant_id: tenant_id.clone(),
                    reason: format!("entry at sequence {} does not extend the head: {}", e.sequence, e),
                });
            }
        }

        // Reached when a concurrent writer committed between our two reads.
        let Some(tail) = orphans.last().filter(|t| t.sequence == last_sequence) else {
            return Ok(Reconciled::Moved);
        };

        match self.store.advance_head(tail, head.version, now_millis()).await? {
            CommitOutcome::Committed(new_head) => {
                tracing::warn!(
                    tenant = %tenant_id,
                    adopted = orphans.len(),
                    chain_length = new_head.chain_length,
                    "adopted orphaned audit entries"
                );
                Ok(Reconciled::Ready {
                    head: new_head,
                    tail_timestamp: Some(tail.timestamp),
                })
            }
            CommitOutcome::VersionConflict { .. } | CommitOutcome::SequenceTaken { .. } => {
                Ok(Reconciled::Moved)
            }
        }
    }
}
