//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite but
//! keeps everything in memory; the write lock is the atomic primitive behind
//! the compare-and-swap. It also exposes fault-injection hooks that no real
//! deployment would have, so tests can tamper with, orphan and delete
//! entries behind the chain's back.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use audit_chain_core::{
    AuditLogEntry, ChainHead, EntryFilter, EntryId, TenantId, VerificationMetadata,
};

use crate::error::{Result, StoreError};
use crate::traits::{CommitOutcome, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Per-tenant entries indexed by sequence.
    chains: HashMap<TenantId, BTreeMap<u64, AuditLogEntry>>,

    /// Id index: (tenant, entry id) -> sequence.
    ids: HashMap<(TenantId, EntryId), u64>,

    /// Chain heads.
    heads: BTreeMap<TenantId, ChainHead>,

    /// Verification metadata.
    verifications: HashMap<TenantId, VerificationMetadata>,
}

impl MemoryStoreInner {
    fn insert(&mut self, entry: AuditLogEntry) {
        self.ids
            .insert((entry.tenant_id.clone(), entry.id), entry.sequence);
        self.chains
            .entry(entry.tenant_id.clone())
            .or_default()
            .insert(entry.sequence, entry);
    }

    fn range<'a>(
        &'a self,
        tenant_id: &TenantId,
        start: u64,
        end: u64,
    ) -> impl Iterator<Item = &'a AuditLogEntry> + 'a {
        self.chains
            .get(tenant_id)
            .into_iter()
            .flat_map(move |chain| chain.range(start..end.max(start)).map(|(_, e)| e))
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Rewrite a stored entry in place. Returns whether the entry existed.
    ///
    /// Fault injection only: entries are otherwise immutable.
    pub fn tamper_entry(
        &self,
        tenant_id: &TenantId,
        sequence: u64,
        f: impl FnOnce(&mut AuditLogEntry),
    ) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner
            .chains
            .get_mut(tenant_id)
            .and_then(|chain| chain.get_mut(&sequence))
        {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    /// Store an entry without advancing the head, as if the process died
    /// between the insert and the head update.
    ///
    /// Fault injection only.
    pub fn insert_orphan(&self, entry: AuditLogEntry) {
        self.inner.write().unwrap().insert(entry);
    }

    /// Remove an entry. Returns whether it existed.
    ///
    /// Fault injection only.
    pub fn delete_entry(&self, tenant_id: &TenantId, sequence: u64) -> bool {
        let mut inner = self.inner.write().unwrap();
        let removed = inner
            .chains
            .get_mut(tenant_id)
            .and_then(|chain| chain.remove(&sequence));
        match removed {
            Some(entry) => {
                inner.ids.remove(&(tenant_id.clone(), entry.id));
                true
            }
            None => false,
        }
    }

    /// Overwrite a head without any version check.
    ///
    /// Fault injection only.
    pub fn overwrite_head(&self, head: ChainHead) {
        let mut inner = self.inner.write().unwrap();
        inner.heads.insert(head.tenant_id.clone(), head);
    }

    /// Number of stored entries for a tenant, orphans included.
    pub fn entry_count(&self, tenant_id: &TenantId) -> usize {
        let inner = self.inner.read().unwrap();
        inner.chains.get(tenant_id).map_or(0, |c| c.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_entry(&self, tenant_id: &TenantId, id: &EntryId) -> Result<Option<AuditLogEntry>> {
        let inner = self.inner.read().unwrap();
        let Some(sequence) = inner.ids.get(&(tenant_id.clone(), *id)) else {
            return Ok(None);
        };
        Ok(inner
            .chains
            .get(tenant_id)
            .and_then(|chain| chain.get(sequence))
            .cloned())
    }

    async fn get_entry_by_sequence(
        &self,
        tenant_id: &TenantId,
        sequence: u64,
    ) -> Result<Option<AuditLogEntry>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .chains
            .get(tenant_id)
            .and_then(|chain| chain.get(&sequence))
            .cloned())
    }

    async fn latest_entry(&self, tenant_id: &TenantId) -> Result<Option<AuditLogEntry>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .chains
            .get(tenant_id)
            .and_then(|chain| chain.values().next_back())
            .cloned())
    }

    async fn get_entries_range(
        &self,
        tenant_id: &TenantId,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.range(tenant_id, start, end).take(limit).cloned().collect())
    }

    async fn query_entries(
        &self,
        tenant_id: &TenantId,
        filter: &EntryFilter,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .range(tenant_id, start, end)
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_head(&self, tenant_id: &TenantId) -> Result<Option<ChainHead>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.heads.get(tenant_id).cloned())
    }

    async fn init_head(&self, tenant_id: &TenantId, now: i64) -> Result<ChainHead> {
        let mut inner = self.inner.write().unwrap();
        Ok(inner
            .heads
            .entry(tenant_id.clone())
            .or_insert_with(|| ChainHead::genesis(tenant_id.clone(), now))
            .clone())
    }

    async fn commit_entry(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
    ) -> Result<CommitOutcome> {
        let mut inner = self.inner.write().unwrap();

        let Some(head) = inner.heads.get(&entry.tenant_id) else {
            return Err(StoreError::InvalidData(format!(
                "no chain head for tenant {}",
                entry.tenant_id
            )));
        };

        if head.version != expected_version {
            return Ok(CommitOutcome::VersionConflict {
                current_version: head.version,
            });
        }

        if let Some(existing) = inner
            .chains
            .get(&entry.tenant_id)
            .and_then(|chain| chain.get(&entry.sequence))
        {
            return Ok(CommitOutcome::SequenceTaken {
                existing: existing.id,
            });
        }

        let new_head = head.advanced_to(entry, entry.timestamp);
        inner.insert(entry.clone());
        inner.heads.insert(entry.tenant_id.clone(), new_head.clone());

        Ok(CommitOutcome::Committed(new_head))
    }

    async fn advance_head(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
        now: i64,
    ) -> Result<CommitOutcome> {
        let mut inner = self.inner.write().unwrap();

        let stored = inner
            .chains
            .get(&entry.tenant_id)
            .and_then(|chain| chain.get(&entry.sequence));
        if stored.map(|e| e.id) != Some(entry.id) {
            return Err(StoreError::InvalidData(format!(
                "entry {} is not stored at sequence {}",
                entry.id, entry.sequence
            )));
        }

        let Some(head) = inner.heads.get(&entry.tenant_id) else {
            return Err(StoreError::InvalidData(format!(
                "no chain head for tenant {}",
                entry.tenant_id
            )));
        };

        if head.version != expected_version {
            return Ok(CommitOutcome::VersionConflict {
                current_version: head.version,
            });
        }

        let new_head = head.advanced_to(entry, now);
        inner.heads.insert(entry.tenant_id.clone(), new_head.clone());

        Ok(CommitOutcome::Committed(new_head))
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.heads.keys().cloned().collect())
    }

    async fn get_verification(&self, tenant_id: &TenantId) -> Result<Option<VerificationMetadata>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.verifications.get(tenant_id).cloned())
    }

    async fn put_verification(&self, metadata: &VerificationMetadata) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let newer = match inner.verifications.get(&metadata.tenant_id) {
            Some(recorded) => match recorded.last_verified_at {
                Some(at) => metadata.last_verified_at.map_or(false, |new| new >= at),
                None => true,
            },
            None => true,
        };
        if newer {
            inner
                .verifications
                .insert(metadata.tenant_id.clone(), metadata.clone());
        }
        Ok(())
    }
}
