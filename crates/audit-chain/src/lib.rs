//! # Audit Chain
//!
//! A tamper-evident, multi-tenant audit log. Every entry commits to the hash
//! of the entry before it, so modifying, removing or reordering any stored
//! entry is detectable by re-walking the chain.
//!
//! ## Overview
//!
//! - **Append**: events are canonicalized, linked to the tenant's chain head
//!   and committed with a compare-and-swap on the head version
//! - **Verify**: re-derive every hash and link from durable storage
//! - **Query**: paged, filtered, read-only scans of a tenant's entries
//! - **Export**: a self-contained chain dump that third parties can verify
//!   without access to the store
//!
//! Tenants are fully independent: each has its own chain, its own head and
//! its own sequence numbers, and contention on one never delays another.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use audit_chain::{AuditLog, AuditLogConfig};
//! use audit_chain::core::{Action, AuditEvent, Resource, TenantId};
//! use audit_chain::store::SqliteStore;
//!
//! async fn example() {
//!     let store = SqliteStore::open("audit.db").unwrap();
//!     let log = AuditLog::new(store, AuditLogConfig::default());
//!
//!     let tenant = TenantId::new("acme").unwrap();
//!     let entry = log
//!         .append(
//!             &tenant,
//!             AuditEvent::for_action(Action::ConsentGranted, Resource::ConsentRecord, "c-17")
//!                 .actor("user-4"),
//!         )
//!         .await
//!         .unwrap();
//!     assert_eq!(entry.sequence, 0);
//!
//!     let report = log.verify(&tenant, 0).await.unwrap();
//!     assert!(report.is_valid());
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `audit_chain::core` - Taxonomy, canonical encoding, entries, chain walking
//! - `audit_chain::store` - Storage abstraction, SQLite and in-memory stores

pub mod appender;
pub mod config;
pub mod error;
pub mod export;
pub mod log;
pub mod query;
pub mod verifier;

// Re-export component crates
pub use audit_chain_core as core;
pub use audit_chain_store as store;

pub use config::{AuditLogConfig, RetryPolicy};
pub use error::{AuditError, Result};
pub use export::{
    ChainExport, ExportFormat, ExportHeader, ExportRange, ExportedEntry, EXPORT_FORMAT_VERSION,
};
pub use log::AuditLog;
pub use query::EntryQuery;
pub use verifier::VerificationReport;

// Re-export commonly used core types
pub use audit_chain_core::{
    Action, AuditEvent, AuditLogEntry, Category, ChainHash, ChainHead, DateRange, EntryFilter,
    EntryId, Outcome, RawAuditEvent, Resource, Severity, TenantId, VerificationMetadata,
    VerificationStatus,
};
