//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via `tokio::task::spawn_blocking`.
//!
//! The head compare-and-swap is an immediate transaction that runs
//! `UPDATE chain_heads ... WHERE version = ?` and inserts the entry. The
//! `UNIQUE(tenant_id, sequence)` constraint is the second line of defence:
//! even a writer that bypassed the version check could not fork a chain.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Params, TransactionBehavior,
};

use audit_chain_core::{
    Action, AuditLogEntry, Category, ChainHash, ChainHead, EntryFilter, EntryId, Outcome,
    Resource, Severity, TenantId, VerificationMetadata, VerificationStatus,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{CommitOutcome, Store};

const ENTRY_COLUMNS: &str = "entry_id, tenant_id, sequence, category, action, resource, \
     resource_id, actor_id, correlation_id, severity, outcome, schema_version, \
     canonical_payload, entry_hash, previous_entry_hash, timestamp";

const HEAD_COLUMNS: &str =
    "tenant_id, last_entry_id, last_entry_hash, chain_length, version, last_updated";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))
}

/// Raw column values of an entry row.
struct EntryRow {
    entry_id: Vec<u8>,
    tenant_id: String,
    sequence: i64,
    category: String,
    action: String,
    resource: String,
    resource_id: String,
    actor_id: Option<String>,
    correlation_id: Option<String>,
    severity: String,
    outcome: String,
    schema_version: u16,
    canonical_payload: Vec<u8>,
    entry_hash: Vec<u8>,
    previous_entry_hash: Vec<u8>,
    timestamp: i64,
}

impl EntryRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entry_id: row.get("entry_id")?,
            tenant_id: row.get("tenant_id")?,
            sequence: row.get("sequence")?,
            category: row.get("category")?,
            action: row.get("action")?,
            resource: row.get("resource")?,
            resource_id: row.get("resource_id")?,
            actor_id: row.get("actor_id")?,
            correlation_id: row.get("correlation_id")?,
            severity: row.get("severity")?,
            outcome: row.get("outcome")?,
            schema_version: row.get("schema_version")?,
            canonical_payload: row.get("canonical_payload")?,
            entry_hash: row.get("entry_hash")?,
            previous_entry_hash: row.get("previous_entry_hash")?,
            timestamp: row.get("timestamp")?,
        })
    }

    /// Decode the row. A row that fails is reported with its sequence so
    /// verification can locate it.
    fn into_entry(self) -> Result<AuditLogEntry> {
        let sequence = to_u64(self.sequence, "sequence")?;
        let entry_id = EntryId::try_from(self.entry_id.as_slice()).ok();
        self.decode(sequence)
            .map_err(|reason| StoreError::CorruptEntry {
                sequence,
                entry_id,
                reason,
            })
    }

    fn decode(self, sequence: u64) -> std::result::Result<AuditLogEntry, String> {
        fn invalid(what: &str, e: impl std::fmt::Display) -> String {
            format!("{}: {}", what, e)
        }

        Ok(AuditLogEntry {
            id: EntryId::try_from(self.entry_id.as_slice()).map_err(|e| invalid("entry_id", e))?,
            tenant_id: TenantId::new(self.tenant_id).map_err(|e| invalid("tenant_id", e))?,
            sequence,
            category: Category::parse(&self.category).map_err(|e| invalid("category", e))?,
            action: Action::parse(&self.action).map_err(|e| invalid("action", e))?,
            resource: Resource::parse(&self.resource).map_err(|e| invalid("resource", e))?,
            resource_id: self.resource_id,
            actor_id: self.actor_id,
            correlation_id: self.correlation_id,
            severity: Severity::parse(&self.severity).map_err(|e| invalid("severity", e))?,
            outcome: Outcome::parse(&self.outcome).map_err(|e| invalid("outcome", e))?,
            schema_version: self.schema_version,
            canonical_payload: Bytes::from(self.canonical_payload),
            entry_hash: hash_column(&self.entry_hash, "entry_hash")?,
            previous_entry_hash: hash_column(&self.previous_entry_hash, "previous_entry_hash")?,
            timestamp: self.timestamp,
        })
    }
}

fn to_u64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("negative {}: {}", column, value)))
}

fn to_i64(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{} out of range: {}", column, value)))
}

fn hash_column(bytes: &[u8], column: &str) -> std::result::Result<ChainHash, String> {
    ChainHash::try_from(bytes).map_err(|_| format!("{} has {} bytes", column, bytes.len()))
}

fn to_hash(bytes: &[u8], column: &str) -> Result<ChainHash> {
    hash_column(bytes, column).map_err(StoreError::InvalidData)
}

fn read_head(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, Option<Vec<u8>>, Vec<u8>, i64, i64, i64)> {
    Ok((
        row.get("tenant_id")?,
        row.get("last_entry_id")?,
        row.get("last_entry_hash")?,
        row.get("chain_length")?,
        row.get("version")?,
        row.get("last_updated")?,
    ))
}

fn head_from_row(
    (tenant_id, last_entry_id, last_entry_hash, chain_length, version, last_updated): (
        String,
        Option<Vec<u8>>,
        Vec<u8>,
        i64,
        i64,
        i64,
    ),
) -> Result<ChainHead> {
    let last_entry_id = last_entry_id
        .map(|b| {
            EntryId::try_from(b.as_slice())
                .map_err(|_| StoreError::InvalidData("last_entry_id has wrong length".into()))
        })
        .transpose()?;

    Ok(ChainHead {
        tenant_id: TenantId::new(tenant_id)
            .map_err(|e| StoreError::InvalidData(format!("tenant_id: {}", e)))?,
        last_entry_id,
        last_entry_hash: to_hash(&last_entry_hash, "last_entry_hash")?,
        chain_length: to_u64(chain_length, "chain_length")?,
        version: to_u64(version, "version")?,
        last_updated,
    })
}

fn select_head(conn: &Connection, tenant_id: &str) -> Result<Option<ChainHead>> {
    conn.query_row(
        &format!("SELECT {} FROM chain_heads WHERE tenant_id = ?1", HEAD_COLUMNS),
        params![tenant_id],
        read_head,
    )
    .optional()?
    .map(head_from_row)
    .transpose()
}

fn select_entry_at(conn: &Connection, tenant_id: &str, sequence: i64) -> Result<Option<AuditLogEntry>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM audit_entries WHERE tenant_id = ?1 AND sequence = ?2",
            ENTRY_COLUMNS
        ),
        params![tenant_id, sequence],
        EntryRow::read,
    )
    .optional()?
    .map(EntryRow::into_entry)
    .transpose()
}

fn insert_entry(conn: &Connection, entry: &AuditLogEntry) -> Result<usize> {
    let inserted = conn.execute(
        &format!(
            "INSERT INTO audit_entries ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            ENTRY_COLUMNS
        ),
        params![
            entry.id.as_bytes().as_slice(),
            entry.tenant_id.as_str(),
            to_i64(entry.sequence, "sequence")?,
            entry.category.as_str(),
            entry.action.as_str(),
            entry.resource.as_str(),
            entry.resource_id,
            entry.actor_id,
            entry.correlation_id,
            entry.severity.as_str(),
            entry.outcome.as_str(),
            entry.schema_version,
            entry.canonical_payload.as_ref(),
            entry.entry_hash.as_bytes().as_slice(),
            entry.previous_entry_hash.as_bytes().as_slice(),
            entry.timestamp,
        ],
    )?;
    Ok(inserted)
}

/// Conditionally move a head onto `new_head`. Returns whether it moved.
fn swap_head(conn: &Connection, new_head: &ChainHead, expected_version: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE chain_heads
            SET last_entry_id = ?1, last_entry_hash = ?2, chain_length = ?3,
                version = ?4, last_updated = ?5
          WHERE tenant_id = ?6 AND version = ?7",
        params![
            new_head.last_entry_id.map(|id| id.as_bytes().to_vec()),
            new_head.last_entry_hash.as_bytes().as_slice(),
            to_i64(new_head.chain_length, "chain_length")?,
            to_i64(new_head.version, "version")?,
            new_head.last_updated,
            new_head.tenant_id.as_str(),
            to_i64(expected_version, "version")?,
        ],
    )?;
    Ok(updated == 1)
}

fn is_constraint_violation(e: &StoreError) -> bool {
    matches!(
        e,
        StoreError::Database(rusqlite::Error::SqliteFailure(f, _))
            if f.code == ErrorCode::ConstraintViolation
    )
}

fn read_entries<P: Params>(stmt: &mut rusqlite::Statement<'_>, params: P) -> Result<Vec<AuditLogEntry>> {
    let rows = stmt
        .query_map(params, EntryRow::read)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(EntryRow::into_entry).collect()
}

/// Append `AND <condition> ?N` to a query, binding `value` as parameter N.
fn push_clause(sql: &mut String, values: &mut Vec<Value>, condition: &str, value: Value) {
    values.push(value);
    sql.push_str(&format!(" AND {} ?{}", condition, values.len()));
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_entry(&self, tenant_id: &TenantId, id: &EntryId) -> Result<Option<AuditLogEntry>> {
        let tenant_id = tenant_id.as_str().to_string();
        let id = *id;
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM audit_entries WHERE tenant_id = ?1 AND entry_id = ?2",
                    ENTRY_COLUMNS
                ),
                params![tenant_id, id.as_bytes().as_slice()],
                EntryRow::read,
            )
            .optional()?
            .map(EntryRow::into_entry)
            .transpose()
        })
        .await
    }

    async fn get_entry_by_sequence(
        &self,
        tenant_id: &TenantId,
        sequence: u64,
    ) -> Result<Option<AuditLogEntry>> {
        let tenant_id = tenant_id.as_str().to_string();
        let sequence = to_i64(sequence, "sequence")?;
        self.run(move |conn| select_entry_at(conn, &tenant_id, sequence))
            .await
    }

    async fn latest_entry(&self, tenant_id: &TenantId) -> Result<Option<AuditLogEntry>> {
        let tenant_id = tenant_id.as_str().to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM audit_entries WHERE tenant_id = ?1
                     ORDER BY sequence DESC LIMIT 1",
                    ENTRY_COLUMNS
                ),
                params![tenant_id],
                EntryRow::read,
            )
            .optional()?
            .map(EntryRow::into_entry)
            .transpose()
        })
        .await
    }

    async fn get_entries_range(
        &self,
        tenant_id: &TenantId,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        self.query_entries(tenant_id, &EntryFilter::all(), start, end, limit)
            .await
    }

    async fn query_entries(
        &self,
        tenant_id: &TenantId,
        filter: &EntryFilter,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        let tenant_id = tenant_id.as_str().to_string();
        let filter = filter.clone();
        // SQLite integers are signed; clamp the open upper bound.
        let start = i64::try_from(start).unwrap_or(i64::MAX);
        let end = i64::try_from(end).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.run(move |conn| {
            let mut sql = format!(
                "SELECT {} FROM audit_entries WHERE tenant_id = ?1 AND sequence >= ?2 AND sequence < ?3",
                ENTRY_COLUMNS
            );
            let mut values = vec![
                Value::Text(tenant_id),
                Value::Integer(start),
                Value::Integer(end),
            ];

            if let Some(category) = filter.category {
                push_clause(&mut sql, &mut values, "category =", Value::Text(category.as_str().into()));
            }
            if let Some(action) = filter.action {
                push_clause(&mut sql, &mut values, "action =", Value::Text(action.as_str().into()));
            }
            if let Some(range_start) = filter.date_range.and_then(|r| r.start) {
                push_clause(&mut sql, &mut values, "timestamp >=", Value::Integer(range_start));
            }
            if let Some(range_end) = filter.date_range.and_then(|r| r.end) {
                push_clause(&mut sql, &mut values, "timestamp <", Value::Integer(range_end));
            }
            if let Some(actor) = filter.actor_id {
                push_clause(&mut sql, &mut values, "actor_id =", Value::Text(actor));
            }
            if let Some(correlation) = filter.correlation_id {
                push_clause(&mut sql, &mut values, "correlation_id =", Value::Text(correlation));
            }
            values.push(Value::Integer(limit));
            sql.push_str(&format!(" ORDER BY sequence ASC LIMIT ?{}", values.len()));

            let mut stmt = conn.prepare(&sql)?;
            read_entries(&mut stmt, params_from_iter(values.iter()))
        })
        .await
    }

    async fn get_head(&self, tenant_id: &TenantId) -> Result<Option<ChainHead>> {
        let tenant_id = tenant_id.as_str().to_string();
        self.run(move |conn| select_head(conn, &tenant_id)).await
    }

    async fn init_head(&self, tenant_id: &TenantId, now: i64) -> Result<ChainHead> {
        let tenant = tenant_id.clone();
        self.run(move |conn| {
            let genesis = ChainHead::genesis(tenant.clone(), now);
            conn.execute(
                "INSERT OR IGNORE INTO chain_heads
                    (tenant_id, last_entry_id, last_entry_hash, chain_length, version, last_updated)
                 VALUES (?1, NULL, ?2, 0, 0, ?3)",
                params![
                    tenant.as_str(),
                    genesis.last_entry_hash.as_bytes().as_slice(),
                    now
                ],
            )?;
            select_head(conn, tenant.as_str())?.ok_or_else(|| {
                StoreError::InvalidData(format!("chain head for {} vanished", tenant))
            })
        })
        .await
    }

    async fn commit_entry(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
    ) -> Result<CommitOutcome> {
        let entry = entry.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(head) = select_head(&tx, entry.tenant_id.as_str())? else {
                return Err(StoreError::InvalidData(format!(
                    "no chain head for tenant {}",
                    entry.tenant_id
                )));
            };

            let new_head = head.advanced_to(&entry, entry.timestamp);
            if !swap_head(&tx, &new_head, expected_version)? {
                return Ok(CommitOutcome::VersionConflict {
                    current_version: head.version,
                });
            }

            let inserted = insert_entry(&tx, &entry);
            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    let sequence = to_i64(entry.sequence, "sequence")?;
                    // Dropping the transaction rolls the head swap back.
                    drop(tx);
                    let existing = select_entry_at(conn, entry.tenant_id.as_str(), sequence)?;
                    return match existing {
                        Some(existing) => Ok(CommitOutcome::SequenceTaken {
                            existing: existing.id,
                        }),
                        None => Err(e),
                    };
                }
                Err(e) => return Err(e),
            }

            tx.commit()?;
            Ok(CommitOutcome::Committed(new_head))
        })
        .await
    }

    async fn advance_head(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
        now: i64,
    ) -> Result<CommitOutcome> {
        let entry = entry.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let sequence = to_i64(entry.sequence, "sequence")?;

            let stored = select_entry_at(&tx, entry.tenant_id.as_str(), sequence)?;
            if stored.map(|e| e.id) != Some(entry.id) {
                return Err(StoreError::InvalidData(format!(
                    "entry {} is not stored at sequence {}",
                    entry.id, entry.sequence
                )));
            }

            let Some(head) = select_head(&tx, entry.tenant_id.as_str())? else {
                return Err(StoreError::InvalidData(format!(
                    "no chain head for tenant {}",
                    entry.tenant_id
                )));
            };

            let new_head = head.advanced_to(&entry, now);
            if !swap_head(&tx, &new_head, expected_version)? {
                return Ok(CommitOutcome::VersionConflict {
                    current_version: head.version,
                });
            }

            tx.commit()?;
            Ok(CommitOutcome::Committed(new_head))
        })
        .await
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT tenant_id FROM chain_heads ORDER BY tenant_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.into_iter()
                .map(|id| {
                    TenantId::new(id).map_err(|e| StoreError::InvalidData(format!("tenant_id: {}", e)))
                })
                .collect()
        })
        .await
    }

    async fn get_verification(&self, tenant_id: &TenantId) -> Result<Option<VerificationMetadata>> {
        let tenant = tenant_id.clone();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT status, last_verified_at, broken_at_entry_id, broken_at_sequence,
                            entries_verified
                       FROM chain_verifications WHERE tenant_id = ?1",
                    params![tenant.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<i64>>(1)?,
                            row.get::<_, Option<Vec<u8>>>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()?;

            let Some((status, last_verified_at, broken_id, broken_sequence, verified)) = row else {
                return Ok(None);
            };

            let status = VerificationStatus::parse(&status).ok_or_else(|| {
                StoreError::Serialization(format!("unknown verification status: {}", status))
            })?;
            let broken_at_entry_id = broken_id
                .map(|b| {
                    EntryId::try_from(b.as_slice()).map_err(|_| {
                        StoreError::InvalidData("broken_at_entry_id has wrong length".into())
                    })
                })
                .transpose()?;

            Ok(Some(VerificationMetadata {
                tenant_id: tenant,
                status,
                last_verified_at,
                broken_at_entry_id,
                broken_at_sequence: broken_sequence
                    .map(|s| to_u64(s, "broken_at_sequence"))
                    .transpose()?,
                entries_verified: to_u64(verified, "entries_verified")?,
            }))
        })
        .await
    }

    async fn put_verification(&self, metadata: &VerificationMetadata) -> Result<()> {
        // An older result never replaces a newer one.
        let metadata = metadata.clone();
        self.run(move |conn| {
            let broken_sequence = metadata
                .broken_at_sequence
                .map(|s| to_i64(s, "broken_at_sequence"))
                .transpose()?;
            conn.execute(
                "INSERT INTO chain_verifications
                    (tenant_id, status, last_verified_at, broken_at_entry_id,
                     broken_at_sequence, entries_verified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                    status = excluded.status,
                    last_verified_at = excluded.last_verified_at,
                    broken_at_entry_id = excluded.broken_at_entry_id,
                    broken_at_sequence = excluded.broken_at_sequence,
                    entries_verified = excluded.entries_verified
                 WHERE chain_verifications.last_verified_at IS NULL
                    OR excluded.last_verified_at >= chain_verifications.last_verified_at",
                params![
                    metadata.tenant_id.as_str(),
                    metadata.status.as_str(),
                    metadata.last_verified_at,
                    metadata.broken_at_entry_id.map(|id| id.as_bytes().to_vec()),
                    broken_sequence,
                    to_i64(metadata.entries_verified, "entries_verified")?,
                ],
            )?;
            Ok(())
        })
        .await
    }
}
