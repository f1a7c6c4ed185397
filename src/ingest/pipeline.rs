//! Ingestion pipeline
//!
//! Drains a run's staged listings (merged with their details) into the
//! canonical store, then deactivates records the run did not see, then merges
//! pending metrics. Per-record problems become counters; only store errors
//! abort a pass.

use crate::config::IngestConfig;
use crate::extract::RawListing;
use crate::ingest::normalize::{normalize, parse_estimate_str, EstimateKind};
use crate::ingest::raw::RawRecord;
use crate::ingest::transform::transform;
use crate::ingest::validate::validate;
use crate::storage::{
    now, CanonicalStore, SqliteCanonical, SqliteStaging, StagingStore,
};
use crate::Result;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;

/// Outcome counters of one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub processed: usize,
    pub skipped_missing_detail: usize,
    pub skipped_invalid: usize,
    pub failed: usize,
    pub deactivated: usize,
    pub metrics_merged: usize,
    pub metrics_unmatched: usize,

    /// Unmatched metrics dropped at the end of a full pass
    pub metrics_retired: usize,
}

impl IngestReport {
    pub fn skipped(&self) -> usize {
        self.skipped_missing_detail + self.skipped_invalid + self.failed
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {}, skipped {} (missing detail {}, invalid {}, failed {}), deactivated {}, metrics merged {} (unmatched {}, retired {})",
            self.processed,
            self.skipped(),
            self.skipped_missing_detail,
            self.skipped_invalid,
            self.failed,
            self.deactivated,
            self.metrics_merged,
            self.metrics_unmatched,
            self.metrics_retired
        )
    }
}

/// Reconciles staged documents into the canonical store
#[derive(Clone)]
pub struct Ingestor {
    staging: SqliteStaging,
    canonical: SqliteCanonical,
    settings: IngestConfig,
}

fn listing_document(listing: &RawListing) -> Value {
    json!({
        "category": listing.category,
        "list_type": listing.list_type.to_db_string(),
        "rank": listing.rank,
        "name": listing.name,
        "developer": listing.developer,
        "source_url": listing.source_url,
    })
}

impl Ingestor {
    pub fn new(staging: SqliteStaging, canonical: SqliteCanonical, settings: IngestConfig) -> Self {
        Self {
            staging,
            canonical,
            settings,
        }
    }

    /// Runs one ingestion pass
    ///
    /// # Arguments
    ///
    /// * `run_id` - Run whose staged listings are ingested
    /// * `metrics_only` - Skip listings and only merge pending metrics
    pub fn run(&self, run_id: i64, metrics_only: bool) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        if metrics_only {
            tracing::info!("Merging staged metrics (run {})", run_id);
        } else {
            tracing::info!("Starting ingestion of run {}", run_id);
            self.ingest_listings(run_id, &mut report)?;
        }
        self.merge_metrics(!metrics_only, &mut report)?;

        tracing::info!("Ingestion of run {} complete: {}", run_id, report);
        Ok(report)
    }

    fn ingest_listings(&self, run_id: i64, report: &mut IngestReport) -> Result<()> {
        let listings = self.staging.listings(run_id)?;
        let batch_size = self.settings.batch_size.max(1);
        let batches = listings.len().div_ceil(batch_size);
        let seen_at = now();
        let mut seen: HashSet<String> = HashSet::new();

        for (index, batch) in listings.chunks(batch_size).enumerate() {
            tracing::info!("Processing batch {} of {}", index + 1, batches);
            for listing in batch {
                self.ingest_one(listing, &seen_at, &mut seen, report)?;
            }
        }

        if seen.is_empty() {
            tracing::warn!(
                "No records were ingested for run {}; skipping deactivation",
                run_id
            );
        } else {
            report.deactivated = self.canonical.deactivate_stale(&seen)?;
            tracing::info!("Deactivated {} records not seen in run {}", report.deactivated, run_id);
        }
        Ok(())
    }

    fn ingest_one(
        &self,
        listing: &RawListing,
        seen_at: &str,
        seen: &mut HashSet<String>,
        report: &mut IngestReport,
    ) -> Result<()> {
        let Some(detail) = self.staging.detail_document(&listing.source_url)? else {
            tracing::debug!("No detail staged for {}", listing.source_url);
            report.skipped_missing_detail += 1;
            return Ok(());
        };

        let merged = RawRecord::merge_documents(&detail, &listing_document(listing));
        let raw = RawRecord::from_document(&merged);
        let record = match validate(transform(normalize(&raw, &self.settings))) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", listing.source_url, e);
                report.skipped_invalid += 1;
                return Ok(());
            }
        };

        match self.canonical.upsert(&record, seen_at) {
            Ok(()) => {
                seen.insert(record.external_id);
                report.processed += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to upsert {}: {}", record.external_id, e);
                report.failed += 1;
            }
        }
        Ok(())
    }

    /// Merges pending metrics onto canonical records
    ///
    /// After a full pass every record of the run has been upserted, so a
    /// metric that still has no canonical row is retired; a later metrics
    /// task restages it if the item shows up again. A metrics-only pass keeps
    /// unmatched metrics pending for the ingestion that follows.
    fn merge_metrics(&self, retire_unmatched: bool, report: &mut IngestReport) -> Result<()> {
        for metric in self.staging.unprocessed_metrics()? {
            let downloads = metric
                .downloads
                .as_deref()
                .map(|d| parse_estimate_str(d, EstimateKind::Downloads));
            let revenue = metric
                .revenue
                .as_deref()
                .map(|r| parse_estimate_str(r, EstimateKind::Revenue));

            let matched = self
                .canonical
                .apply_metrics(&metric.external_id, downloads, revenue)?;
            if !matched {
                tracing::debug!("No canonical record for metrics of {}", metric.external_id);
                report.metrics_unmatched += 1;
                if !retire_unmatched {
                    continue;
                }
            }

            let flagged = self
                .staging
                .mark_metric_processed(&metric.external_id, metric.version)?;
            if !flagged {
                tracing::debug!(
                    "Metrics of {} were restaged during the merge; leaving them pending",
                    metric.external_id
                );
            } else if matched {
                report.metrics_merged += 1;
            } else {
                report.metrics_retired += 1;
            }
        }
        Ok(())
    }
}
