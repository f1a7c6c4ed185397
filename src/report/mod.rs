//! Statistics over the staging store, canonical store and task queue
//!
//! Used by the `--stats` CLI mode.

use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::queue::{DeadLetter, QueueCounts, TaskQueue};
use crate::storage::{
    CanonicalCounts, CanonicalStore, RunRecord, StagingCounts, StagingStore,
};
use crate::Result;

/// Pipeline statistics summary
#[derive(Debug, Clone)]
pub struct PipelineStatistics {
    pub staging: StagingCounts,
    pub canonical: CanonicalCounts,
    pub queue: QueueCounts,
    pub dead_letters: Vec<DeadLetter>,

    /// Most recent run and its category progress, if any run exists
    pub latest_run: Option<(RunRecord, Option<ProgressSnapshot>)>,
}

/// Loads statistics from the stores
///
/// # Arguments
///
/// * `staging` - Staging store
/// * `canonical` - Canonical store
/// * `progress` - Progress tracker of the staging database
/// * `queue` - Task queue
pub fn load_statistics(
    staging: &dyn StagingStore,
    canonical: &dyn CanonicalStore,
    progress: &ProgressTracker,
    queue: &dyn TaskQueue,
) -> Result<PipelineStatistics> {
    let latest_run = match staging.latest_run()? {
        Some(run) => {
            let snapshot = progress.snapshot(run.id)?;
            Some((run, snapshot))
        }
        None => None,
    };

    Ok(PipelineStatistics {
        staging: staging.counts()?,
        canonical: canonical.counts()?,
        queue: queue.counts()?,
        dead_letters: queue.dead_letters()?,
        latest_run,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &PipelineStatistics) {
    println!("=== Chart-Ripple Statistics ===\n");

    match &stats.latest_run {
        Some((run, snapshot)) => {
            println!("Latest run: #{} ({})", run.id, run.status.to_db_string());
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            if let Some(snapshot) = snapshot {
                let total = snapshot.completed.len() + snapshot.remaining.len();
                println!(
                    "  Categories: {} / {} done",
                    snapshot.completed.len(),
                    total
                );
                if !snapshot.remaining.is_empty() {
                    let remaining: Vec<&str> =
                        snapshot.remaining.iter().map(String::as_str).collect();
                    println!("  Remaining: {}", remaining.join(", "));
                }
            }
        }
        None => println!("No runs recorded yet"),
    }
    println!();

    println!("Staging:");
    println!("  Runs: {}", stats.staging.runs);
    println!("  Listings: {}", stats.staging.listings);
    println!("  Details: {}", stats.staging.details);
    println!(
        "  Metrics: {} ({} not yet merged)",
        stats.staging.metrics, stats.staging.unprocessed_metrics
    );
    println!();

    let total = stats.canonical.active + stats.canonical.inactive;
    println!("Canonical:");
    println!("  Apps: {}", total);
    println!("  Active: {}", stats.canonical.active);
    println!("  Inactive: {}", stats.canonical.inactive);
    println!();

    println!("Task queue:");
    println!("  Pending: {}", stats.queue.pending);
    println!("  Leased: {}", stats.queue.leased);
    println!("  Done: {}", stats.queue.done);
    println!("  Dead: {}", stats.queue.dead);

    if !stats.dead_letters.is_empty() {
        println!();
        println!("Dead-lettered tasks ({}):", stats.dead_letters.len());
        for letter in &stats.dead_letters {
            println!(
                "  - #{} {} after {} deliveries: {}",
                letter.id,
                letter.kind,
                letter.deliveries,
                letter.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
