//! SQLite persistence layer.
//!
//! One `Repository` struct whose impl is split across submodules:
//! - `schema`: schema initialization and format-version migrations
//! - `documents`: document rows
//! - `pages`: image page rows, claims, and the claim reaper
//! - `ocr`: OCR text, entity, and search index rows
//! - `state`: background ingest loop state

mod documents;
mod ocr;
mod pages;
mod schema;
mod state;

pub use state::IngestState;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Open a connection with the pragmas every caller needs.
pub(crate) fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(10))?;
    // journal_mode returns the resulting mode as a row.
    let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

/// Retry a database operation a few times when SQLite reports the
/// database as busy or locked.
pub(crate) fn with_retry<T, F>(mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0;
    loop {
        match op() {
            Err(RepositoryError::Database(e)) if is_busy(&e) && attempt < MAX_ATTEMPTS => {
                attempt += 1;
                std::thread::sleep(Duration::from_millis(50 * attempt as u64));
            }
            other => return other,
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Parse an RFC3339 datetime column, defaulting to the Unix epoch.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// SQLite-backed repository for the whole pipeline.
pub struct Repository {
    pub(crate) db_path: PathBuf,
}

impl Repository {
    /// Open (and if necessary create/migrate) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        repo.migrate()?;
        Ok(repo)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}
