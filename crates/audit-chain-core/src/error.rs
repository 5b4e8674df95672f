//! Error types for the audit chain core.

use thiserror::Error;

use crate::crypto::ChainHash;
use crate::types::EntryId;

/// An event was rejected before it reached the chain.
///
/// This is always the caller's fault and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEventError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {0} must not be empty")]
    EmptyField(&'static str),

    #[error("field {field} exceeds {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("unknown {field} value: {value:?}")]
    UnknownValue { field: &'static str, value: String },

    #[error("action {action} does not belong to category {category}")]
    ActionNotInCategory { action: String, category: String },

    #[error("detail keys must not be empty")]
    EmptyDetailKey,

    #[error("detail {key:?} holds a non-finite number")]
    NonFiniteNumber { key: String },

    #[error("details nest deeper than {max} levels")]
    DetailsTooDeep { max: usize },

    #[error("unsupported schema version: {0}")]
    UnsupportedSchema(u16),
}

/// Errors decoding stored canonical bytes.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Why a chain failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// An entry's sequence number is not the successor of the previous one.
    SequenceGap,
    /// `previous_entry_hash` does not match the prior entry's hash.
    BrokenLink,
    /// Recomputing the digest over the stored payload gives a different hash.
    HashMismatch,
    /// The sealed payload names a different tenant or position than the row.
    EnvelopeMismatch,
    /// The head records more entries than the entry table holds.
    Truncated,
    /// The head's hash disagrees with the entry it points at.
    HeadMismatch,
    /// A stored row could not be decoded into an entry at all.
    Corrupted,
}

impl BreakKind {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            BreakKind::SequenceGap => "sequence_gap",
            BreakKind::BrokenLink => "broken_link",
            BreakKind::HashMismatch => "hash_mismatch",
            BreakKind::EnvelopeMismatch => "envelope_mismatch",
            BreakKind::Truncated => "truncated",
            BreakKind::HeadMismatch => "head_mismatch",
            BreakKind::Corrupted => "corrupted",
        }
    }
}

/// Detected tampering or corruption in a tenant's chain.
///
/// Only verification produces this. It calls for an operator, never an
/// automatic repair.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error(
    "chain broken at sequence {sequence} ({}): expected {expected_hash}, found {actual_hash}",
    kind.as_str()
)]
pub struct ChainIntegrityError {
    /// The entry where verification stopped. For truncation this is the
    /// entry the head points at, which may no longer exist.
    pub entry_id: Option<EntryId>,
    /// Sequence number of the failing position.
    pub sequence: u64,
    /// What was inconsistent.
    pub kind: BreakKind,
    /// The hash verification expected at this position.
    pub expected_hash: ChainHash,
    /// The hash actually found or recomputed.
    pub actual_hash: ChainHash,
}
