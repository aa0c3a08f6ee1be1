//! Database schema migrations for calsync.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 3;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!("failed to read schema_version: {}", e);
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: events, tags and the scalar kv table.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id            TEXT PRIMARY KEY,
            external_id   TEXT,
            remote_calendar_id TEXT,
            title         TEXT NOT NULL,
            start_time    TEXT NOT NULL,
            end_time      TEXT NOT NULL,
            is_all_day    INTEGER NOT NULL DEFAULT 0,
            calendar_ids  TEXT NOT NULL DEFAULT '[]',
            tag_ids       TEXT NOT NULL DEFAULT '[]',
            sync_status   TEXT NOT NULL,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            local_version INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS tags (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            calendar_id TEXT
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_sync_status ON events(sync_status);
        CREATE INDEX IF NOT EXISTS idx_events_external_id ON events(external_id);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: the append-only action log.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS actions (
            seq           INTEGER PRIMARY KEY AUTOINCREMENT,
            id            TEXT NOT NULL UNIQUE,
            action_type   TEXT NOT NULL,
            entity_type   TEXT NOT NULL,
            entity_id     TEXT NOT NULL,
            source        TEXT NOT NULL,
            data          TEXT NOT NULL,
            previous_data TEXT,
            timestamp     TEXT NOT NULL,
            synchronized  INTEGER NOT NULL DEFAULT 0,
            failed        INTEGER NOT NULL DEFAULT 0,
            retry_count   INTEGER NOT NULL DEFAULT 0,
            last_error    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_actions_entity ON actions(entity_id);
        CREATE INDEX IF NOT EXISTS idx_actions_outcome ON actions(synchronized, failed);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}

/// Migration v3: retry gating, dispatch tracking and conflict bookkeeping.
///
/// Adds:
/// - actions.next_attempt_at: backoff gate (RFC 3339, UTC)
/// - actions.in_flight: set while a remote call for the action is outstanding
/// - events.conflict_copy: preserved losing version after a conflict (JSON)
/// - events.last_sync_error: message surfaced when sync_status = error
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE actions ADD COLUMN next_attempt_at TEXT;
         ALTER TABLE actions ADD COLUMN in_flight INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE events ADD COLUMN conflict_copy TEXT;
         ALTER TABLE events ADD COLUMN last_sync_error TEXT;",
    )?;

    set_schema_version(&tx, 3)?;
    tx.commit()?;
    Ok(())
}
