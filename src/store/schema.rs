//! Bootstrap schema for both storage backends.
//!
//! Each backend carries an ordered list of versions. A database records the
//! last version it received (`PRAGMA user_version` on SQLite, the
//! `schema_version` table on PostgreSQL) and only later versions are applied.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use tracing::info;

pub struct SchemaVersion {
    pub version: i64,
    pub statements: &'static [&'static str],
}

// =============================================================================
// PostgreSQL
// =============================================================================

pub const POSTGRES_SCHEMA_VERSIONS: &[SchemaVersion] = &[SchemaVersion {
    version: 1,
    statements: &[
        "CREATE TABLE IF NOT EXISTS frequencies (
            id SERIAL PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        "INSERT INTO frequencies (name) VALUES ('hourly'), ('daily') ON CONFLICT (name) DO NOTHING",
        "CREATE TABLE IF NOT EXISTS subscriptions (
            id BIGSERIAL PRIMARY KEY,
            token UUID NOT NULL UNIQUE,
            confirmed BOOLEAN NOT NULL DEFAULT FALSE,
            email TEXT NOT NULL,
            city TEXT NOT NULL,
            frequency_id INTEGER NOT NULL REFERENCES frequencies(id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_email_city ON subscriptions (email, city)",
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_frequency_confirmed
            ON subscriptions (frequency_id, confirmed)",
        "CREATE TABLE IF NOT EXISTS pending_confirmation_emails (
            id BIGSERIAL PRIMARY KEY,
            to_address TEXT NOT NULL,
            token UUID NOT NULL,
            completed BOOLEAN NOT NULL DEFAULT FALSE,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_try_after TIMESTAMPTZ NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_pending_confirmation_emails_due
            ON pending_confirmation_emails (next_try_after) WHERE completed = FALSE",
    ],
}];

/// Applies every PostgreSQL schema version newer than the recorded one.
///
/// Runs inside one transaction holding an advisory lock, so two processes
/// starting together do not race on the bootstrap.
pub fn apply_postgres_schema(client: &mut postgres::Client) -> Result<()> {
    let mut tx = client
        .transaction()
        .context("Failed to open schema transaction")?;
    tx.execute("SELECT pg_advisory_xact_lock(727274)", &[])?;
    tx.batch_execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version BIGINT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )?;
    let current: i64 = tx
        .query_one("SELECT COALESCE(MAX(version), 0) FROM schema_version", &[])?
        .try_get(0)?;

    for schema in POSTGRES_SCHEMA_VERSIONS.iter().filter(|s| s.version > current) {
        info!("Applying PostgreSQL schema version {}", schema.version);
        for statement in schema.statements {
            tx.batch_execute(statement)
                .with_context(|| format!("Schema version {} failed", schema.version))?;
        }
        tx.execute(
            "INSERT INTO schema_version (version) VALUES ($1)",
            &[&schema.version],
        )?;
    }

    tx.commit().context("Failed to commit schema transaction")?;
    Ok(())
}

// =============================================================================
// SQLite
// =============================================================================

/// Timestamps are unix milliseconds, tokens are hyphenated UUID text.
pub const SQLITE_SCHEMA_VERSIONS: &[SchemaVersion] = &[SchemaVersion {
    version: 1,
    statements: &[
        "CREATE TABLE frequencies (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        "INSERT OR IGNORE INTO frequencies (name) VALUES ('hourly'), ('daily')",
        "CREATE TABLE subscriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token TEXT NOT NULL UNIQUE,
            confirmed INTEGER NOT NULL DEFAULT 0,
            email TEXT NOT NULL,
            city TEXT NOT NULL,
            frequency_id INTEGER NOT NULL REFERENCES frequencies(id)
        )",
        "CREATE INDEX idx_subscriptions_email_city ON subscriptions (email, city)",
        "CREATE INDEX idx_subscriptions_frequency_confirmed ON subscriptions (frequency_id, confirmed)",
        "CREATE TABLE pending_confirmation_emails (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            to_address TEXT NOT NULL,
            token TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_try_after INTEGER NOT NULL
        )",
        "CREATE INDEX idx_pending_confirmation_emails_due
            ON pending_confirmation_emails (completed, next_try_after)",
    ],
}];

pub fn apply_sqlite_schema(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = SQLITE_SCHEMA_VERSIONS.last().map(|s| s.version).unwrap_or(0);
    if current > latest {
        bail!(
            "Database schema version {} is newer than the supported version {}",
            current,
            latest
        );
    }

    let tx = conn.transaction()?;
    for schema in SQLITE_SCHEMA_VERSIONS.iter().filter(|s| s.version > current) {
        info!("Applying SQLite schema version {}", schema.version);
        for statement in schema.statements {
            tx.execute_batch(statement)
                .with_context(|| format!("Schema version {} failed", schema.version))?;
        }
        tx.execute(&format!("PRAGMA user_version = {}", schema.version), [])?;
    }
    tx.commit()?;
    Ok(())
}
