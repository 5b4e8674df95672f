//! Store trait: the abstract interface for chain persistence.
//!
//! The appender and verifier are storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use audit_chain_core::{
    AuditLogEntry, ChainHead, EntryFilter, EntryId, TenantId, VerificationMetadata,
};

use crate::error::Result;

/// Result of a conditional head update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write happened; this is the new head.
    Committed(ChainHead),
    /// Another writer moved the head since it was read.
    VersionConflict {
        /// The head's version at the time of the attempt.
        current_version: u64,
    },
    /// An entry already occupies this sequence number, even though the head
    /// version matched. This is an orphan left by an interrupted commit.
    SequenceTaken {
        /// The entry holding the position.
        existing: EntryId,
    },
}

impl CommitOutcome {
    /// Whether the write happened.
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }
}

/// The Store trait: async interface for chain persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the
/// runtime.
///
/// # Design Notes
///
/// - **Entries are append-only**: no method updates or deletes an entry.
/// - **Heads move by compare-and-swap**: [`Store::commit_entry`] and
///   [`Store::advance_head`] only write when the caller's expected version
///   still matches. Nothing else writes a head.
/// - **Verification metadata is separate**: writing it never touches a head.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Entry Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an entry by id, scoped to a tenant.
    async fn get_entry(&self, tenant_id: &TenantId, id: &EntryId) -> Result<Option<AuditLogEntry>>;

    /// Get the entry at a sequence number.
    async fn get_entry_by_sequence(
        &self,
        tenant_id: &TenantId,
        sequence: u64,
    ) -> Result<Option<AuditLogEntry>>;

    /// Get the entry with the highest sequence number, orphans included.
    async fn latest_entry(&self, tenant_id: &TenantId) -> Result<Option<AuditLogEntry>>;

    /// Get entries with `start <= sequence < end`, ordered by sequence,
    /// at most `limit` of them.
    async fn get_entries_range(
        &self,
        tenant_id: &TenantId,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>>;

    /// Like [`Store::get_entries_range`], keeping only entries that match
    /// `filter`. `limit` bounds the number of matches returned.
    async fn query_entries(
        &self,
        tenant_id: &TenantId,
        filter: &EntryFilter,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Head Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a tenant's head, if one was ever created.
    async fn get_head(&self, tenant_id: &TenantId) -> Result<Option<ChainHead>>;

    /// Create the genesis head if absent and return the current head.
    ///
    /// Concurrent callers all observe the same head; creation happens once.
    async fn init_head(&self, tenant_id: &TenantId, now: i64) -> Result<ChainHead>;

    /// Atomically insert `entry` and advance the head onto it, provided the
    /// head's version is still `expected_version`.
    ///
    /// The version check comes first: a stale caller always sees
    /// `VersionConflict`, never `SequenceTaken`.
    async fn commit_entry(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
    ) -> Result<CommitOutcome>;

    /// Advance the head onto an entry that is already stored, provided the
    /// head's version is still `expected_version`. Used to adopt orphans.
    async fn advance_head(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
        now: i64,
    ) -> Result<CommitOutcome>;

    /// All tenants with a head, in id order.
    async fn list_tenants(&self) -> Result<Vec<TenantId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Verification Metadata
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the last recorded verification for a tenant.
    async fn get_verification(&self, tenant_id: &TenantId) -> Result<Option<VerificationMetadata>>;

    /// Record a verification result, replacing the previous one unless that
    /// one is newer.
    async fn put_verification(&self, metadata: &VerificationMetadata) -> Result<()>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn get_entry(&self, tenant_id: &TenantId, id: &EntryId) -> Result<Option<AuditLogEntry>> {
        (**self).get_entry(tenant_id, id).await
    }

    async fn get_entry_by_sequence(
        &self,
        tenant_id: &TenantId,
        sequence: u64,
    ) -> Result<Option<AuditLogEntry>> {
        (**self).get_entry_by_sequence(tenant_id, sequence).await
    }

    async fn latest_entry(&self, tenant_id: &TenantId) -> Result<Option<AuditLogEntry>> {
        (**self).latest_entry(tenant_id).await
    }

    async fn get_entries_range(
        &self,
        tenant_id: &TenantId,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        (**self).get_entries_range(tenant_id, start, end, limit).await
    }

    async fn query_entries(
        &self,
        tenant_id: &TenantId,
        filter: &EntryFilter,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        (**self).query_entries(tenant_id, filter, start, end, limit).await
    }

    async fn get_head(&self, tenant_id: &TenantId) -> Result<Option<ChainHead>> {
        (**self).get_head(tenant_id).await
    }

    async fn init_head(&self, tenant_id: &TenantId, now: i64) -> Result<ChainHead> {
        (**self).init_head(tenant_id, now).await
    }

    async fn commit_entry(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
    ) -> Result<CommitOutcome> {
        (**self).commit_entry(entry, expected_version).await
    }

    async fn advance_head(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
        now: i64,
    ) -> Result<CommitOutcome> {
        (**self).advance_head(entry, expected_version, now).await
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        (**self).list_tenants().await
    }

    async fn get_verification(&self, tenant_id: &TenantId) -> Result<Option<VerificationMetadata>> {
        (**self).get_verification(tenant_id).await
    }

    async fn put_verification(&self, metadata: &VerificationMetadata) -> Result<()> {
        (**self).put_verification(metadata).await
    }
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Read every entry with `start <= sequence < end`, in pages of
    /// `page_size`.
    fn collect_entries(
        &self,
        tenant_id: &TenantId,
        start: u64,
        end: u64,
        page_size: usize,
    ) -> impl std::future::Future<Output = Result<Vec<AuditLogEntry>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn collect_entries(
        &self,
        tenant_id: &TenantId,
        start: u64,
        end: u64,
        page_size: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        let page_size = page_size.max(1);
        let mut entries = Vec::new();
        let mut cursor = start;

        while cursor < end {
            let page = self.get_entries_range(tenant_id, cursor, end, page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.sequence + 1;
            let short = page.len() < page_size;
            entries.extend(page);
            if short {
                break;
            }
        }

        Ok(entries)
    }
}
