//! Pipeline storage using SQLite
//!
//! This module holds every durable record the pipeline needs:
//! - Repositories (lifecycle projection) and the append-only event log
//! - Jobs (durable queue with single-flight per repository and kind)
//! - Chunks and their embeddings
//! - Generated documents
//! - Tutor sessions and turns
//!
//! Operations that must commit together take a `&mut SqliteConnection` so
//! callers can compose them inside one transaction.

mod chunk;
mod document;
mod job;
mod repository;
mod schema;
mod session;

pub use chunk::*;
pub use document::*;
pub use job::*;
pub use repository::*;
pub use schema::*;
pub use session::*;

use crate::config::Config;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Current time in the fixed-width RFC 3339 form used for every stored timestamp
///
/// Fixed width keeps lexical comparison in SQL equal to chronological order.
pub fn timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Timestamp `delay` from now
pub fn timestamp_after(delay: Duration) -> String {
    let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    format_timestamp(Utc::now() + delay)
}

/// Parse a stored timestamp
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Pipeline database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect using the configured database path
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Open (creating if needed) the database at `db_path` and ensure the schema
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if the schema exists
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='repositories'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    /// Start a transaction
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
