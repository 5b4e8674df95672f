//! Database schema migrations for SQLite.
//!
//! Each migration transforms the schema from version N to N+1 and is
//! recorded in `schema_migrations`, so opening an existing file only
//! applies what is missing.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// Idempotent: calling it on an up-to-date database does nothing.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: entries and chain heads.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Append-only entry table; the source of truth for every chain
        CREATE TABLE audit_entries (
            entry_id BLOB PRIMARY KEY,           -- 16 random bytes
            tenant_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,           -- gapless from 0 per tenant
            category TEXT NOT NULL,
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            actor_id TEXT,
            correlation_id TEXT,
            severity TEXT NOT NULL,
            outcome TEXT NOT NULL,
            schema_version INTEGER NOT NULL,
            canonical_payload BLOB NOT NULL,     -- exact hashed bytes
            entry_hash BLOB NOT NULL,            -- 32 bytes
            previous_entry_hash BLOB NOT NULL,   -- 32 bytes, zero at genesis
            timestamp INTEGER NOT NULL,          -- commit time (Unix ms)

            UNIQUE(tenant_id, sequence)
        );

        -- Cached tail pointer per tenant, guarded by version
        CREATE TABLE chain_heads (
            tenant_id TEXT PRIMARY KEY,
            last_entry_id BLOB,
            last_entry_hash BLOB NOT NULL,
            chain_length INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 0,
            last_updated INTEGER NOT NULL
        );

        CREATE INDEX idx_entries_tenant_category ON audit_entries(tenant_id, category, sequence);
        CREATE INDEX idx_entries_tenant_timestamp ON audit_entries(tenant_id, timestamp);
        CREATE INDEX idx_entries_tenant_actor ON audit_entries(tenant_id, actor_id);
        CREATE INDEX idx_entries_tenant_correlation ON audit_entries(tenant_id, correlation_id);
        "#,
    )?;

    Ok(())
}

/// Migration v2: verification metadata, kept apart from the heads so that
/// recording a verification never touches a head's version.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE chain_verifications (
            tenant_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,                -- unverified | valid | broken
            last_verified_at INTEGER,
            broken_at_entry_id BLOB,
            broken_at_sequence INTEGER,
            entries_verified INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
