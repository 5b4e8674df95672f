//! The audit log: unified API over a chain store.
//!
//! [`AuditLog`] ties the canonicalizer, the appender, the verifier and the
//! read paths to one [`Store`]. Appends, verification, queries and exports
//! live in their own modules as further `impl` blocks on the same type.

use std::sync::Arc;

use audit_chain_core::{AuditLogEntry, ChainHead, EntryId, TenantId};
use audit_chain_store::Store;

use crate::config::AuditLogConfig;
use crate::error::Result;

/// A tamper-evident, multi-tenant audit log.
///
/// Cloning is cheap and shares the store, so one log can be handed to many
/// concurrent tasks.
pub struct AuditLog<S: Store> {
    /// The storage backend.
    pub(crate) store: Arc<S>,
    /// Configuration.
    pub(crate) config: AuditLogConfig,
}

impl<S: Store> AuditLog<S> {
    /// Create an audit log over `store`.
    pub fn new(store: S, config: AuditLogConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    /// Create an audit log over a store that is shared with other owners.
    pub fn from_shared(store: Arc<S>, config: AuditLogConfig) -> Self {
        Self { store, config }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    pub fn config(&self) -> &AuditLogConfig {
        &self.config
    }

    /// Get a tenant's chain head, if the tenant has ever appended.
    pub async fn head(&self, tenant_id: &TenantId) -> Result<Option<ChainHead>> {
        Ok(self.store.get_head(tenant_id).await?)
    }

    /// Get a single entry by id.
    pub async fn entry(&self, tenant_id: &TenantId, id: &EntryId) -> Result<Option<AuditLogEntry>> {
        Ok(self.store.get_entry(tenant_id, id).await?)
    }

    /// All tenants that have a chain.
    pub async fn tenants(&self) -> Result<Vec<TenantId>> {
        Ok(self.store.list_tenants().await?)
    }
}

impl<S: Store> Clone for AuditLog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
