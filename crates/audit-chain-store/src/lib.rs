//! # Audit Chain Store
//!
//! Storage abstraction for the audit chain. Provides a trait-based interface
//! for entry and chain-head persistence with SQLite and in-memory
//! implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests, with fault injection
//! - [`CommitOutcome`] - Result of a compare-and-swap on a chain head
//!
//! ## Usage
//!
//! ```rust,no_run
//! use audit_chain_store::{SqliteStore, Store};
//! use audit_chain_core::TenantId;
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("audit.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let tenant = TenantId::new("acme").unwrap();
//!     let head = store.init_head(&tenant, 0).await.unwrap();
//!     assert_eq!(head.chain_length, 0);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Append-only entries**: the trait has no update or delete for entries
//! - **Compare-and-swap heads**: a head only moves if its version is unchanged
//! - **Orphan visibility**: `latest_entry` sees entries the head does not
//!   point at yet, so a crashed commit can be recovered

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CommitOutcome, Store, StoreExt};

#[cfg(test)]
pub(crate) mod testutil {
    use audit_chain_core::{
        canonicalize, Action, AuditEvent, AuditLogEntry, ChainHead, ChainPosition, Resource,
        TenantId,
    };

    pub fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    /// Seal the next entry on top of `head`, timestamped `1000 + sequence`.
    pub fn seal_next(tenant: &TenantId, head: &ChainHead, tail_timestamp: Option<i64>) -> AuditLogEntry {
        let event = AuditEvent::for_action(
            Action::DataUpdated,
            Resource::User,
            format!("user-{}", head.chain_length),
        );
        AuditLogEntry::seal(
            tenant,
            &canonicalize(&event).unwrap(),
            ChainPosition::after(head, tail_timestamp, 1000 + head.chain_length as i64),
        )
    }
}
