//! Error types for the audit log.

use audit_chain_core::{
    BreakKind, ChainHash, ChainIntegrityError, MalformedEventError, TenantId,
};
use audit_chain_store::StoreError;
use thiserror::Error;

/// Errors that can occur during audit log operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The event was rejected before reaching the chain. Not retried.
    #[error("malformed event: {0}")]
    Malformed(#[from] MalformedEventError),

    /// Every compare-and-swap attempt lost to a concurrent writer.
    /// Transient; the caller may retry the whole append.
    #[error("chain contention for tenant {tenant_id}: gave up after {attempts} attempts")]
    ChainContention { tenant_id: TenantId, attempts: u32 },

    /// The durability layer failed or could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(StoreError),

    /// Verification found tampering or corruption.
    #[error("chain integrity violated: {0}")]
    ChainIntegrity(#[from] ChainIntegrityError),

    /// The head and the entry table disagree in a way that cannot be
    /// reconciled safely. Appends for the tenant stop until an operator
    /// intervenes.
    #[error("inconsistent chain head for tenant {tenant_id}: {reason}")]
    InconsistentHead { tenant_id: TenantId, reason: String },

    /// A requested sequence range lies outside the chain.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// An export could not be produced or read back.
    #[error("export error: {0}")]
    Export(String),
}

impl AuditError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AuditError::ChainContention { .. } => true,
            AuditError::StorageUnavailable(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for AuditError {
    /// A row that no longer decodes is corruption, not an outage.
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CorruptEntry {
                sequence, entry_id, ..
            } => AuditError::ChainIntegrity(ChainIntegrityError {
                entry_id,
                sequence,
                kind: BreakKind::Corrupted,
                expected_hash: ChainHash::GENESIS,
                actual_hash: ChainHash::GENESIS,
            }),
            other => AuditError::StorageUnavailable(other),
        }
    }
}

/// Result type for audit log operations.
pub type Result<T> = std::result::Result<T, AuditError>;
