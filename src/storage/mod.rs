//! Storage module for persisting crawl and reconciliation data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - The staging store (runs, categories, raw listings/details/metrics)
//! - The canonical store (reconciled app records)
//!
//! The progress tracker and the task queue live in the staging database too
//! and share its connection handle.

mod canonical;
mod schema;
mod staging;
mod traits;

pub use canonical::SqliteCanonical;
pub use schema::{initialize_canonical, initialize_staging};
pub use staging::SqliteStaging;
pub use traits::{
    AppFilter, CanonicalAppRecord, CanonicalCounts, CanonicalStore, StagedMetric, StagingCounts,
    StagingStore, StorageError, StorageResult,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// A database connection shared between the stores of one process
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Locks a shared connection
pub(crate) fn lock(conn: &SharedConnection) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| StorageError::Poisoned)
}

fn configure(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(std::time::Duration::from_secs(30))?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA temp_store = MEMORY;
    ",
    )?;
    Ok(())
}

/// Opens (or creates) the staging database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SharedConnection)` - Connection with the staging schema applied
/// * `Err(StorageError)` - Failed to open or initialize the database
pub fn open_staging(path: &Path) -> StorageResult<SharedConnection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    initialize_staging(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Opens (or creates) the canonical database
pub fn open_canonical(path: &Path) -> StorageResult<SharedConnection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    initialize_canonical(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory staging database (for tests)
pub fn staging_in_memory() -> StorageResult<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    initialize_staging(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory canonical database (for tests)
pub fn canonical_in_memory() -> StorageResult<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    initialize_canonical(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Current time in the fixed-width format every timestamp column uses
///
/// Microsecond precision with a `Z` suffix keeps text comparison in SQL
/// consistent with chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
