//! Error types for the store module.

use audit_chain_core::EntryId;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage, or a write that would create it.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The backend could not be reached (poisoned lock, lost worker).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored entry row no longer decodes. The row is identified by its
    /// sequence, and by its id when that column is still readable.
    #[error("corrupt entry at sequence {sequence}: {reason}")]
    CorruptEntry {
        sequence: u64,
        entry_id: Option<EntryId>,
        reason: String,
    },
}

impl StoreError {
    /// Whether the same call may succeed later. Bad stored data never heals
    /// on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Unavailable(_))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(format!("blocking task failed: {}", e))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_data_is_not_transient() {
        assert!(StoreError::Unavailable("gone".into()).is_transient());
        assert!(!StoreError::InvalidData("entry_hash has 31 bytes".into()).is_transient());
        assert!(!StoreError::CorruptEntry {
            sequence: 1,
            entry_id: None,
            reason: "category: unknown".into(),
        }
        .is_transient());
    }
}
