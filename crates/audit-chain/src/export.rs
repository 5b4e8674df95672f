//! Chain export for third parties.
//!
//! An export carries every entry's `canonical_payload`, `entry_hash`,
//! `previous_entry_hash` and `schema_version`, plus the verification report
//! taken when it was produced. That is enough to re-verify the chain with
//! nothing but Blake3 and a CBOR decoder; [`ChainExport::verify`] does
//! exactly that without a store.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use audit_chain_core::{
    Action, AuditLogEntry, BreakKind, Category, ChainHash, ChainIntegrityError, ChainWalker,
    EntryId, Outcome, Resource, Severity, TenantId, WalkSummary, HASH_ALGORITHM,
};
use audit_chain_store::{Store, StoreExt};

use crate::error::{AuditError, Result};
use crate::log::{now_millis, AuditLog};
use crate::verifier::VerificationReport;

/// Version of the export layout.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Serialization of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// One JSON document.
    Json,
    /// A header line followed by one line per entry.
    JsonLines,
    /// One CBOR document.
    Cbor,
}

/// Half-open sequence range `[from, to)` of an export. `to = None` means
/// up to the head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportRange {
    pub from: u64,
    pub to: Option<u64>,
}

impl ExportRange {
    /// The whole chain.
    pub fn full() -> Self {
        Self::default()
    }

    /// Everything from `from` to the head.
    pub fn starting_at(from: u64) -> Self {
        Self { from, to: None }
    }

    /// Entries `from..to`.
    pub fn between(from: u64, to: u64) -> Self {
        Self { from, to: Some(to) }
    }
}

/// Export metadata; the first line of a JSON Lines export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportHeader {
    pub format_version: u32,
    pub tenant_id: TenantId,
    pub hash_algorithm: String,
    pub genesis_hash: ChainHash,
    pub exported_at: i64,
    /// First exported sequence.
    pub from_sequence: u64,
    /// One past the last exported sequence.
    pub to_sequence: u64,
    /// Hash of entry `from_sequence - 1`, or genesis.
    pub anchor_hash: ChainHash,
    /// Chain length when exported.
    pub chain_length: u64,
    /// Tail hash when exported.
    pub head_hash: ChainHash,
    pub verification: VerificationReport,
}

/// One exported entry. Binary fields are hex in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub id: EntryId,
    pub sequence: u64,
    pub category: Category,
    pub action: Action,
    pub resource: Resource,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub severity: Severity,
    pub outcome: Outcome,
    pub schema_version: u16,
    pub timestamp: i64,
    pub canonical_payload: String,
    pub entry_hash: ChainHash,
    pub previous_entry_hash: ChainHash,
}

impl From<&AuditLogEntry> for ExportedEntry {
    fn from(entry: &AuditLogEntry) -> Self {
        Self {
            id: entry.id,
            sequence: entry.sequence,
            category: entry.category,
            action: entry.action,
            resource: entry.resource,
            resource_id: entry.resource_id.clone(),
            actor_id: entry.actor_id.clone(),
            correlation_id: entry.correlation_id.clone(),
            severity: entry.severity,
            outcome: entry.outcome,
            schema_version: entry.schema_version,
            timestamp: entry.timestamp,
            canonical_payload: hex::encode(&entry.canonical_payload),
            entry_hash: entry.entry_hash,
            previous_entry_hash: entry.previous_entry_hash,
        }
    }
}

impl ExportedEntry {
    /// Rebuild the stored entry.
    pub fn to_entry(&self, tenant_id: &TenantId) -> Result<AuditLogEntry> {
        let payload = hex::decode(&self.canonical_payload).map_err(|e| {
            AuditError::Export(format!("entry {}: bad canonical_payload: {}", self.sequence, e))
        })?;

        Ok(AuditLogEntry {
            id: self.id,
            tenant_id: tenant_id.clone(),
            sequence: self.sequence,
            category: self.category,
            action: self.action,
            resource: self.resource,
            resource_id: self.resource_id.clone(),
            actor_id: self.actor_id.clone(),
            correlation_id: self.correlation_id.clone(),
            severity: self.severity,
            outcome: self.outcome,
            schema_version: self.schema_version,
            canonical_payload: Bytes::from(payload),
            entry_hash: self.entry_hash,
            previous_entry_hash: self.previous_entry_hash,
            timestamp: self.timestamp,
        })
    }
}

/// A self-contained, independently verifiable chain export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainExport {
    pub header: ExportHeader,
    pub entries: Vec<ExportedEntry>,
}

impl ChainExport {
    /// Serialize in the given format.
    pub fn encode(&self, format: ExportFormat) -> Result<Vec<u8>> {
        let err = |e: &dyn std::fmt::Display| AuditError::Export(e.to_string());
        match format {
            ExportFormat::Json => serde_json::to_vec_pretty(self).map_err(|e| err(&e)),
            ExportFormat::JsonLines => {
                let mut out = serde_json::to_vec(&self.header).map_err(|e| err(&e))?;
                for entry in &self.entries {
                    out.push(b'\n');
                    serde_json::to_writer(&mut out, entry).map_err(|e| err(&e))?;
                }
                out.push(b'\n');
                Ok(out)
            }
            ExportFormat::Cbor => {
                let mut out = Vec::new();
                ciborium::into_writer(self, &mut out).map_err(|e| err(&e))?;
                Ok(out)
            }
        }
    }

    /// Parse an export produced by [`ChainExport::encode`].
    pub fn decode(format: ExportFormat, bytes: &[u8]) -> Result<Self> {
        let err = |e: &dyn std::fmt::Display| AuditError::Export(e.to_string());
        match format {
            ExportFormat::Json => serde_json::from_slice(bytes).map_err(|e| err(&e)),
            ExportFormat::JsonLines => {
                let mut lines = bytes
                    .split(|b| *b == b'\n')
                    .filter(|line| !line.iter().all(u8::is_ascii_whitespace));
                let header_line = lines
                    .next()
                    .ok_or_else(|| AuditError::Export("empty export".into()))?;
                let header: ExportHeader = serde_json::from_slice(header_line).map_err(|e| err(&e))?;
                let entries = lines
                    .map(|line| serde_json::from_slice(line).map_err(|e| err(&e)))
                    .collect::<Result<Vec<ExportedEntry>>>()?;
                Ok(Self { header, entries })
            }
            ExportFormat::Cbor => ciborium::from_reader(bytes).map_err(|e| err(&e)),
        }
    }

    /// Re-verify the exported chain without any store.
    ///
    /// Checks every link and hash, that the entries cover exactly the
    /// declared range, and, when the export reaches the head, that the last
    /// hash equals the declared head hash.
    pub fn verify(&self) -> Result<WalkSummary> {
        let header = &self.header;
        if header.format_version != EXPORT_FORMAT_VERSION {
            return Err(AuditError::Export(format!(
                "unsupported export format version {}",
                header.format_version
            )));
        }
        if header.hash_algorithm != HASH_ALGORITHM {
            return Err(AuditError::Export(format!(
                "unsupported hash algorithm {:?}",
                header.hash_algorithm
            )));
        }
        if header.genesis_hash != ChainHash::GENESIS {
            return Err(AuditError::Export("unexpected genesis hash".into()));
        }
        if header.from_sequence == 0 && header.anchor_hash != ChainHash::GENESIS {
            return Err(AuditError::Export("export from genesis has a non-genesis anchor".into()));
        }

        let mut walker = ChainWalker::from_checkpoint(
            header.tenant_id.clone(),
            header.from_sequence,
            header.anchor_hash,
        );
        for exported in &self.entries {
            let entry = exported.to_entry(&header.tenant_id)?;
            walker.check(&entry)?;
        }
        let summary = walker.finish(None)?;

        if summary.next_sequence != header.to_sequence {
            return Err(ChainIntegrityError {
                entry_id: summary.tail_entry_id,
                sequence: summary.next_sequence,
                kind: BreakKind::Truncated,
                expected_hash: header.head_hash,
                actual_hash: summary.tail_hash,
            }
            .into());
        }
        if header.to_sequence == header.chain_length && summary.tail_hash != header.head_hash {
            return Err(ChainIntegrityError {
                entry_id: summary.tail_entry_id,
                sequence: header.to_sequence.saturating_sub(1),
                kind: BreakKind::HeadMismatch,
                expected_hash: summary.tail_hash,
                actual_hash: header.head_hash,
            }
            .into());
        }

        Ok(summary)
    }
}

impl<S: Store> AuditLog<S> {
    /// Build an export of `range`, verifying the whole chain first.
    ///
    /// A broken chain is still exported; the embedded report says where it
    /// breaks.
    pub async fn build_export(&self, tenant_id: &TenantId, range: ExportRange) -> Result<ChainExport> {
        let verification = self.verify(tenant_id, 0).await?;
        if !verification.is_valid() {
            tracing::warn!(
                tenant = %tenant_id,
                broken_at = ?verification.broken_at_sequence(),
                "exporting a chain that failed verification"
            );
        }

        let chain_length = verification.chain_length;
        let to = range.to.map_or(chain_length, |to| to.min(chain_length));
        if range.from > to {
            return Err(AuditError::InvalidRange(format!(
                "export range {}..{} is outside chain {} of length {}",
                range.from, to, tenant_id, chain_length
            )));
        }

        let anchor_hash = if range.from == 0 {
            ChainHash::GENESIS
        } else {
            self.store
                .get_entry_by_sequence(tenant_id, range.from - 1)
                .await?
                .map(|anchor| anchor.entry_hash)
                .ok_or_else(|| {
                    AuditError::Export(format!("no entry at sequence {} to anchor the export", range.from - 1))
                })?
        };

        let entries = self
            .store
            .collect_entries(tenant_id, range.from, to, self.config.query_page_size)
            .await?;

        tracing::info!(
            tenant = %tenant_id,
            from = range.from,
            to,
            entries = entries.len(),
            "exported audit chain"
        );

        Ok(ChainExport {
            header: ExportHeader {
                format_version: EXPORT_FORMAT_VERSION,
                tenant_id: tenant_id.clone(),
                hash_algorithm: HASH_ALGORITHM.to_string(),
                genesis_hash: ChainHash::GENESIS,
                exported_at: now_millis(),
                from_sequence: range.from,
                to_sequence: to,
                anchor_hash,
                chain_length,
                head_hash: verification.head_hash,
                verification,
            },
            entries: entries.iter().map(ExportedEntry::from).collect(),
        })
    }

    /// Export `range` of a tenant's chain, serialized as `format`.
    pub async fn export_chain(
        &self,
        tenant_id: &TenantId,
        format: ExportFormat,
        range: ExportRange,
    ) -> Result<Vec<u8>> {
        self.build_export(tenant_id, range).await?.encode(format)
    }
}
