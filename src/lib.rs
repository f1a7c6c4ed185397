//! Chart-Ripple: a staged catalog crawler and reconciliation pipeline
//!
//! This crate crawls a ranked app catalog in stages (categories, listings,
//! details, secondary metrics), stages the raw output, and reconciles it into
//! a canonical store with idempotent upserts and staleness deactivation.

pub mod config;
pub mod crawl;
pub mod extract;
pub mod fetch;
pub mod ingest;
pub mod progress;
pub mod queue;
pub mod report;
pub mod storage;

use thiserror::Error;

/// Main error type for Chart-Ripple operations
#[derive(Debug, Error)]
pub enum RippleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] extract::ExtractionError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No crawl run found")]
    NoRun,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Chart-Ripple operations
pub type Result<T> = std::result::Result<T, RippleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawl::{Orchestrator, WorkerPool};
pub use ingest::{IngestReport, Ingestor};
pub use progress::ProgressTracker;
pub use queue::{SqliteTaskQueue, Task, TaskQueue};
