//! Database lifecycle: opening the `SQLite` file and creating the schema.

use std::path::Path;

use switchy_database::Database;
use switchy_database_connection::init_sqlite_rusqlite;

use crate::{DbError, sql::SqlStore};

/// Default location of the `SQLite` database file.
pub const DEFAULT_DATABASE_PATH: &str = "data/skyguard.db";

/// Opens (or creates) the `SQLite` database at `path` and ensures all
/// tables exist.
///
/// # Errors
///
/// Returns [`DbError`] if the parent directory cannot be created, the file
/// cannot be opened, or the schema DDL fails.
pub async fn open(path: &Path) -> Result<Box<dyn Database>, DbError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let db = init_sqlite_rusqlite(Some(path)).map_err(|e| DbError::Connection {
        message: e.to_string(),
    })?;

    ensure_schema(db.as_ref()).await?;

    Ok(db)
}

/// Opens the database named by `DATABASE_PATH` (default
/// [`DEFAULT_DATABASE_PATH`]) and wraps it in a [`SqlStore`].
///
/// # Errors
///
/// Returns [`DbError`] if the database cannot be opened.
pub async fn connect_from_env() -> Result<SqlStore, DbError> {
    let path =
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());

    log::info!("Opening database at {path}");
    let db = open(Path::new(&path)).await?;

    Ok(SqlStore::new(db))
}

/// Creates all tables and indexes if they don't already exist.
///
/// # Errors
///
/// Returns [`DbError`] if any DDL statement fails.
pub async fn ensure_schema(db: &dyn Database) -> Result<(), DbError> {
    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            threat_type TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            danger_radius INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending',
            probability TEXT NOT NULL DEFAULT 'low',
            report_count INTEGER NOT NULL DEFAULT 1,
            weighted_score REAL NOT NULL DEFAULT 0.0,
            parent_id INTEGER REFERENCES reports(id),
            author_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            resolved_at TEXT,
            notifications_sent INTEGER NOT NULL DEFAULT 0
        )",
    )
    .await?;

    db.exec_raw(
        "CREATE INDEX IF NOT EXISTS idx_reports_type_created
            ON reports(threat_type, created_at)",
    )
    .await?;

    db.exec_raw("CREATE INDEX IF NOT EXISTS idx_reports_parent ON reports(parent_id)")
        .await?;

    db.exec_raw("CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status)")
        .await?;

    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS user_profiles (
            user_id INTEGER PRIMARY KEY,
            trust_rating REAL NOT NULL DEFAULT 0.0,
            last_latitude REAL,
            last_longitude REAL,
            channel_id TEXT,
            notifications_enabled INTEGER NOT NULL DEFAULT 1
        )",
    )
    .await?;

    db.exec_raw(
        "CREATE INDEX IF NOT EXISTS idx_user_profiles_channel
            ON user_profiles(channel_id)",
    )
    .await?;

    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS link_codes (
            code TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            used INTEGER NOT NULL DEFAULT 0
        )",
    )
    .await?;

    db.exec_raw("CREATE INDEX IF NOT EXISTS idx_link_codes_user ON link_codes(user_id)")
        .await?;

    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS shelters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            address TEXT NOT NULL,
            capacity INTEGER NOT NULL DEFAULT 0,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL
        )",
    )
    .await?;

    Ok(())
}
