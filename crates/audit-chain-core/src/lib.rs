//! # Audit Chain Core
//!
//! Pure primitives for the tamper-evident audit chain: the event taxonomy,
//! canonical encoding, hashing, entries and chain walking.
//!
//! This crate contains no I/O and no storage. Everything here is
//! deterministic computation over events and entries.
//!
//! ## Key Types
//!
//! - [`AuditEvent`] - A semantic event handed in by a collaborator
//! - [`AuditLogEntry`] - An immutable, chained record
//! - [`ChainHead`] - The cached tail pointer of a tenant's chain
//! - [`ChainWalker`] - Incremental chain verification
//!
//! ## Canonicalization
//!
//! Events are encoded as deterministic CBOR, then sealed with their chain
//! position before hashing. See the [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod event;
pub mod filter;
pub mod head;
pub mod taxonomy;
pub mod types;
pub mod verify;

pub use canonical::{canonicalize, open_payload, seal_payload, CanonicalEvent, PayloadEnvelope};
pub use crypto::{digest, ChainHash, HASH_ALGORITHM};
pub use entry::{AuditLogEntry, ChainPosition};
pub use error::{BreakKind, ChainIntegrityError, CoreError, MalformedEventError};
pub use event::{AuditEvent, Details, RawAuditEvent};
pub use filter::{DateRange, EntryFilter};
pub use head::{ChainHead, VerificationMetadata, VerificationStatus};
pub use taxonomy::{Action, Category, Outcome, Resource, Severity, TAXONOMY_SCHEMA_VERSION};
pub use types::{EntryId, TenantId};
pub use verify::{ChainWalker, WalkSummary};

/// Result alias for payload decoding.
pub type Result<T> = std::result::Result<T, CoreError>;
