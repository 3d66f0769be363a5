//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: Record tables and local settings
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS records (
            record_type TEXT NOT NULL,
            id TEXT NOT NULL,
            local_id TEXT NOT NULL,
            last_modified INTEGER NOT NULL,
            version INTEGER NOT NULL CHECK (version > 0),
            sync_status TEXT NOT NULL,
            device_id TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            fields TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (record_type, id)
        );
        CREATE INDEX IF NOT EXISTS idx_records_status ON records(record_type, sync_status);
        CREATE INDEX IF NOT EXISTS idx_records_modified ON records(record_type, last_modified DESC);
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (1);",
    )?;

    tx.commit()?;
    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: Conflict ledger and device sync metadata
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id TEXT PRIMARY KEY,
            record_type TEXT NOT NULL,
            record_id TEXT NOT NULL,
            local_payload TEXT NOT NULL,
            remote_payload TEXT NOT NULL,
            local_version INTEGER NOT NULL,
            remote_version INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolution_used TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(record_type, record_id);
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_open ON sync_conflicts(resolved, timestamp);
        CREATE TABLE IF NOT EXISTS sync_metadata (
            device_id TEXT PRIMARY KEY,
            last_sync_timestamp INTEGER NOT NULL,
            sync_version INTEGER NOT NULL,
            pending_count INTEGER NOT NULL,
            conflict_count INTEGER NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (2);",
    )?;

    tx.commit()?;
    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
