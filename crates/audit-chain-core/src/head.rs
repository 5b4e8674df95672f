//! Chain heads and verification metadata.
//!
//! The head is a cached pointer to a tenant's tail. It is never the source
//! of truth: everything in it can be re-derived from the entry table, which
//! is what orphan recovery relies on.

use serde::{Deserialize, Serialize};

use crate::crypto::ChainHash;
use crate::entry::AuditLogEntry;
use crate::types::{EntryId, TenantId};

/// The mutable tail pointer of one tenant's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// The owning tenant.
    pub tenant_id: TenantId,

    /// Id of the last committed entry, absent at genesis.
    pub last_entry_id: Option<EntryId>,

    /// Hash of the last committed entry, or [`ChainHash::GENESIS`].
    pub last_entry_hash: ChainHash,

    /// Number of committed entries. Also the next sequence number.
    pub chain_length: u64,

    /// Optimistic-lock counter, bumped on every head advance.
    pub version: u64,

    /// When the head last moved (Unix ms).
    pub last_updated: i64,
}

impl ChainHead {
    /// A fresh head for a tenant with no entries.
    pub fn genesis(tenant_id: TenantId, now: i64) -> Self {
        Self {
            tenant_id,
            last_entry_id: None,
            last_entry_hash: ChainHash::GENESIS,
            chain_length: 0,
            version: 0,
            last_updated: now,
        }
    }

    /// Sequence number the next entry will take.
    pub fn next_sequence(&self) -> u64 {
        self.chain_length
    }

    /// Whether no entry has been committed yet.
    pub fn is_genesis(&self) -> bool {
        self.chain_length == 0
    }

    /// The head after `entry` has been committed on top of it.
    pub fn advanced_to(&self, entry: &AuditLogEntry, now: i64) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            last_entry_id: Some(entry.id),
            last_entry_hash: entry.entry_hash,
            chain_length: entry.sequence + 1,
            version: self.version + 1,
            last_updated: now,
        }
    }

    /// Whether `entry` is the entry this head points at.
    pub fn points_at(&self, entry: &AuditLogEntry) -> bool {
        self.chain_length == entry.sequence + 1
            && self.last_entry_id == Some(entry.id)
            && self.last_entry_hash == entry.entry_hash
    }
}

/// Outcome of the most recent verification of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Valid,
    Broken,
}

impl VerificationStatus {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Valid => "valid",
            VerificationStatus::Broken => "broken",
        }
    }

    /// Parse a wire name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unverified" => Some(VerificationStatus::Unverified),
            "valid" => Some(VerificationStatus::Valid),
            "broken" => Some(VerificationStatus::Broken),
            _ => None,
        }
    }
}

/// Verification bookkeeping for a tenant.
///
/// Stored apart from the head so that writing it never bumps the head's
/// version and never contends with appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMetadata {
    pub tenant_id: TenantId,
    pub status: VerificationStatus,
    pub last_verified_at: Option<i64>,
    pub broken_at_entry_id: Option<EntryId>,
    pub broken_at_sequence: Option<u64>,
    pub entries_verified: u64,
}

impl VerificationMetadata {
    /// Metadata for a chain that has never been verified.
    pub fn unverified(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            status: VerificationStatus::Unverified,
            last_verified_at: None,
            broken_at_entry_id: None,
            broken_at_sequence: None,
            entries_verified: 0,
        }
    }
}
