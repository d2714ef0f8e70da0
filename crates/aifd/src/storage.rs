//! SQLite plumbing shared by the per-subsystem stores.
//!
//! One database file per subsystem (memory, embed cache, learning,
//! governance), WAL journaling, embedded migrations with a
//! `schema_version` row written in the same transaction.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;

/// Current schema version, shared by all subsystem databases.
pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Open (or create) a subsystem database with WAL journaling.
///
/// Pass `None` for an in-memory database (tests).
pub async fn open_pool(db_path: Option<&Path>) -> Result<Pool<Sqlite>> {
    let options = match db_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
        }
        None => SqliteConnectOptions::new()
            .in_memory(true)
            .shared_cache(true),
    };

    // A single writer connection per file keeps writes serialized while WAL
    // lets readers proceed. In-memory databases need one connection so every
    // handle sees the same data.
    let max_connections = if db_path.is_some() { 4 } else { 1 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Apply a subsystem migration script.
///
/// Statements run in order inside one transaction together with the
/// `schema_version` row, so an interrupted migration leaves nothing behind.
/// Re-running against an up-to-date database is a no-op.
pub async fn migrate(pool: &Pool<Sqlite>, script: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    // Strip comment lines before splitting on ';'.
    let cleaned: String = script
        .lines()
        .filter(|line| !line.trim().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    for statement in cleaned.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Err(e) = sqlx::query(trimmed).execute(&mut *tx).await {
            let msg = e.to_string();
            // Idempotent re-runs: tolerate already-applied DDL.
            if !msg.contains("already exists") && !msg.contains("duplicate column") {
                return Err(e.into());
            }
        }
    }

    let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(&mut *tx)
        .await?;
    match current {
        None => {
            sqlx::query("INSERT INTO schema_version (version) VALUES (?1)")
                .bind(SCHEMA_VERSION)
                .execute(&mut *tx)
                .await?;
        }
        Some(v) if v.0 < SCHEMA_VERSION => {
            sqlx::query("UPDATE schema_version SET version = ?1")
                .bind(SCHEMA_VERSION)
                .execute(&mut *tx)
                .await?;
        }
        Some(_) => {}
    }

    tx.commit().await?;

    // The schema must be reachable after migration.
    let verified: (i64,) = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| StorageError::Unavailable(format!("schema unreachable: {e}")))?;
    if verified.0 != SCHEMA_VERSION {
        return Err(StorageError::Unavailable(format!(
            "schema version mismatch: {} != {SCHEMA_VERSION}",
            verified.0
        )));
    }

    Ok(())
}

/// Normalize an FTS5 bm25 rank (more negative = better) into (0, 1].
pub fn normalize_rank(rank: f64) -> f64 {
    let raw = (-rank).max(0.0);
    raw / (raw + 1.0)
}

/// Sanitize a free-form query into an FTS5 MATCH expression.
///
/// Terms are quoted so bare punctuation is treated literally instead of as
/// FTS syntax; the index is case-insensitive by construction.
pub fn fts_match_expr(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}
