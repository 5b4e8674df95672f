//! Read-only, paged queries over a tenant's chain.

use std::sync::Arc;

use audit_chain_core::{AuditLogEntry, EntryFilter, TenantId};
use audit_chain_store::Store;

use crate::error::Result;
use crate::log::AuditLog;

/// A lazy, finite, restartable scan over matching entries.
///
/// The scan is bounded by the chain length when it was created; entries
/// appended afterwards are not visited. Entries come back in sequence
/// order. [`EntryQuery::cursor`] can be saved and passed to
/// [`AuditLog::resume_query`] to continue later.
pub struct EntryQuery<S: Store> {
    store: Arc<S>,
    tenant_id: TenantId,
    filter: EntryFilter,
    cursor: u64,
    end: u64,
    page_size: usize,
}

impl<S: Store> EntryQuery<S> {
    /// The next sequence number the scan will look at.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// The exclusive upper bound of the scan.
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn filter(&self) -> &EntryFilter {
        &self.filter
    }

    /// Whether every page has been returned.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.end
    }

    /// Fetch the next page of matches, or `None` when the scan is done.
    ///
    /// Pages are never empty.
    pub async fn next_page(&mut self) -> Result<Option<Vec<AuditLogEntry>>> {
        if self.is_exhausted() {
            return Ok(None);
        }

        let page = self
            .store
            .query_entries(
                &self.tenant_id,
                &self.filter,
                self.cursor,
                self.end,
                self.page_size,
            )
            .await?;

        match page.last() {
            // A short page means nothing else matches before `end`.
            Some(last) if page.len() == self.page_size => self.cursor = last.sequence + 1,
            _ => self.cursor = self.end,
        }

        Ok((!page.is_empty()).then_some(page))
    }

    /// Drain the remaining pages into one vector.
    pub async fn collect(mut self) -> Result<Vec<AuditLogEntry>> {
        let mut out = Vec::new();
        while let Some(page) = self.next_page().await? {
            out.extend(page);
        }
        Ok(out)
    }
}

impl<S: Store> AuditLog<S> {
    /// Start a query over a tenant's entries.
    pub async fn query_entries(&self, tenant_id: &TenantId, filter: EntryFilter) -> Result<EntryQuery<S>> {
        self.resume_query(tenant_id, filter, 0).await
    }

    /// Continue a query from a saved cursor, bounded by the current head.
    pub async fn resume_query(
        &self,
        tenant_id: &TenantId,
        filter: EntryFilter,
        cursor: u64,
    ) -> Result<EntryQuery<S>> {
        let end = self
            .store
            .get_head(tenant_id)
            .await?
            .map_or(0, |head| head.chain_length);

        Ok(EntryQuery {
            store: Arc::clone(&self.store),
            tenant_id: tenant_id.clone(),
            filter,
            cursor,
            end,
            page_size: self.config.query_page_size.max(1),
        })
    }
}
