//! Database schema migrations for crossbot.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

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

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: users and times.
///
/// At most one active time per (user, puzzle, date); soft-deleted rows are
/// kept for history and do not count.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            user_id    TEXT PRIMARY KEY,
            name       TEXT,
            crossbucks INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS times (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id      TEXT NOT NULL REFERENCES users(user_id),
            puzzle       TEXT NOT NULL,
            date         TEXT NOT NULL,
            seconds      INTEGER NOT NULL,
            submitted_at TEXT,
            deleted_at   TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_times_active
            ON times(user_id, puzzle, date) WHERE deleted_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_times_puzzle_date ON times(puzzle, date);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: rating model output, one run per puzzle type.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS rating_runs (
            puzzle           TEXT PRIMARY KEY,
            id               TEXT NOT NULL,
            data_fingerprint TEXT NOT NULL,
            fitted_at        TEXT NOT NULL,
            params           TEXT NOT NULL,
            convergence      TEXT NOT NULL,
            limitations      TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS rating_skills (
            puzzle       TEXT NOT NULL,
            user_id      TEXT NOT NULL,
            observations INTEGER NOT NULL,
            mean         REAL NOT NULL,
            p25          REAL NOT NULL,
            p75          REAL NOT NULL,
            PRIMARY KEY (puzzle, user_id)
        );

        CREATE TABLE IF NOT EXISTS rating_difficulties (
            puzzle       TEXT NOT NULL,
            date         TEXT NOT NULL,
            observations INTEGER NOT NULL,
            mean         REAL NOT NULL,
            p25          REAL NOT NULL,
            p75          REAL NOT NULL,
            PRIMARY KEY (puzzle, date)
        );

        CREATE TABLE IF NOT EXISTS rating_predictions (
            puzzle                TEXT NOT NULL,
            user_id               TEXT NOT NULL,
            date                  TEXT NOT NULL,
            log_seconds           REAL NOT NULL,
            predicted_log_seconds REAL NOT NULL,
            residual              REAL NOT NULL,
            PRIMARY KEY (puzzle, user_id, date)
        );",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}
