//! Storage traits and error types
//!
//! This module defines the trait interfaces for the staging and canonical
//! stores and the records they exchange with the rest of the crate.

use crate::extract::{Category, MetricsSnapshot, RawDetail, RawListing};
use crate::storage::{RunRecord, RunStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database connection lock poisoned")]
    Poisoned,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A staged metrics document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMetric {
    pub external_id: String,
    pub downloads: Option<String>,
    pub revenue: Option<String>,
    pub processed: bool,

    /// Staging revision; changes whenever the document is staged again
    pub version: i64,
}

/// Row counts of the staging collections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingCounts {
    pub runs: u64,
    pub listings: u64,
    pub details: u64,
    pub metrics: u64,
    pub unprocessed_metrics: u64,
}

/// Trait for the staging store
///
/// Every write is an insert-if-absent or an upsert, so a redelivered task can
/// repeat its writes without corrupting what is already staged.
pub trait StagingStore {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run (setting `finished_at` for terminal states)
    fn set_run_status(&self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Raw crawl output =====

    /// Records the categories discovered for a run (upsert by name)
    fn stage_categories(&self, run_id: i64, categories: &[Category]) -> StorageResult<()>;

    /// Categories discovered for a run, in discovery order
    fn categories(&self, run_id: i64) -> StorageResult<Vec<Category>>;

    /// Appends listings; returns how many were new
    fn stage_listings(&self, run_id: i64, listings: &[RawListing]) -> StorageResult<usize>;

    /// Every listing staged for a run
    fn listings(&self, run_id: i64) -> StorageResult<Vec<RawListing>>;

    /// Distinct listing URLs staged for a run
    fn listing_urls(&self, run_id: i64) -> StorageResult<Vec<String>>;

    /// Upserts a detail document by its source URL
    fn stage_detail(&self, detail: &RawDetail) -> StorageResult<()>;

    /// The stored detail document for a URL, as untyped JSON
    fn detail_document(&self, source_url: &str) -> StorageResult<Option<serde_json::Value>>;

    /// Upserts a metrics document and resets its processed flag
    fn stage_metric(&self, external_id: &str, snapshot: &MetricsSnapshot) -> StorageResult<()>;

    /// Metrics not yet merged into the canonical store
    fn unprocessed_metrics(&self) -> StorageResult<Vec<StagedMetric>>;

    /// Flags a metrics document as merged, if it is still at `version`
    ///
    /// # Returns
    ///
    /// `false` when the document was staged again after it was read; it then
    /// stays pending for the next merge.
    fn mark_metric_processed(&self, external_id: &str, version: i64) -> StorageResult<bool>;

    // ===== Statistics =====

    fn counts(&self) -> StorageResult<StagingCounts>;
}

/// A reconciled app record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAppRecord {
    pub external_id: String,
    pub name: String,
    pub subtitle: Option<String>,
    pub developer: String,
    pub category: String,
    pub list_type: Option<String>,
    pub rank: i64,
    pub category_rank: Option<String>,
    pub price: Option<String>,
    pub rating_summary: Option<String>,
    pub icon_url: Option<String>,
    pub source_url: String,
    pub description: Option<String>,
    pub screenshots: Vec<String>,
    pub num_screenshots: i64,
    pub has_in_app_purchases: bool,
    pub latest_version: Option<String>,
    pub latest_version_date: Option<NaiveDate>,
    pub reviews: serde_json::Value,
    pub privacy_data: Vec<String>,
    pub general_info: serde_json::Value,
    pub labels: Option<Vec<String>>,
    pub monthly_downloads_estimate: Option<f64>,
    pub monthly_revenue_estimate: Option<f64>,

    /// Pipeline-owned; ignored on upsert
    pub active: bool,
    pub first_seen: String,
    pub last_seen: String,
}

/// Read-only filter for canonical queries
#[derive(Debug, Clone, Default)]
pub struct AppFilter {
    pub category: Option<String>,
    pub active_only: bool,
    pub limit: Option<usize>,
}

/// Active/inactive totals of the canonical store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonicalCounts {
    pub active: u64,
    pub inactive: u64,
}

/// Trait for the canonical store
pub trait CanonicalStore {
    /// Inserts or updates a record by external id
    ///
    /// The record becomes active and `last_seen` moves to `seen_at` unless the
    /// stored value is already later. Absent estimates and labels keep their
    /// stored values.
    fn upsert(&self, record: &CanonicalAppRecord, seen_at: &str) -> StorageResult<()>;

    /// Deactivates every record whose id is not in `seen`
    ///
    /// An empty `seen` set deactivates nothing.
    ///
    /// # Returns
    ///
    /// The number of records newly marked inactive
    fn deactivate_stale(&self, seen: &HashSet<String>) -> StorageResult<usize>;

    /// Writes the estimates onto a record; false if no record matches
    ///
    /// A `None` estimate leaves the stored value untouched.
    fn apply_metrics(
        &self,
        external_id: &str,
        downloads: Option<f64>,
        revenue: Option<f64>,
    ) -> StorageResult<bool>;

    fn get(&self, external_id: &str) -> StorageResult<Option<CanonicalAppRecord>>;

    /// Records matching a filter, ordered by category then rank
    fn query(&self, filter: &AppFilter) -> StorageResult<Vec<CanonicalAppRecord>>;

    fn counts(&self) -> StorageResult<CanonicalCounts>;
}
