//! Chart-Ripple main entry point
//!
//! This is the command-line interface for the Chart-Ripple crawler and
//! reconciliation pipeline.

use anyhow::Context;
use chart_ripple::config::{load_config_with_hash, Config};
use chart_ripple::queue::{SqliteTaskQueue, TaskQueue};
use chart_ripple::report::{load_statistics, print_statistics};
use chart_ripple::storage::{
    open_canonical, open_staging, SqliteCanonical, SqliteStaging, StagingStore,
};
use chart_ripple::{Orchestrator, ProgressTracker, RippleError, WorkerPool};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Chart-Ripple: a staged app-chart crawler
///
/// Chart-Ripple discovers chart categories, stages their ranked listings and
/// detail pages, optionally enriches them with download and revenue
/// estimates, and reconciles everything into a canonical app table.
#[derive(Parser, Debug)]
#[command(name = "chart-ripple")]
#[command(version = "1.0.0")]
#[command(about = "A staged app-chart crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Only drain tasks already in the queue; do not start a run
    #[arg(long, conflicts_with_all = ["ingest", "metrics", "stats", "dry_run"])]
    worker: bool,

    /// Run ingestion now and exit
    #[arg(long, conflicts_with_all = ["worker", "metrics", "stats", "dry_run"])]
    ingest: bool,

    /// Run metrics enrichment (followed by a metrics merge) and exit
    #[arg(long, conflicts_with_all = ["worker", "ingest", "stats", "dry_run"])]
    metrics: bool,

    /// Run to use with --ingest / --metrics (defaults to the latest run)
    #[arg(long, value_name = "ID")]
    run: Option<i64>,

    /// Show statistics from the databases and exit
    #[arg(long, conflicts_with_all = ["worker", "ingest", "metrics", "dry_run"])]
    stats: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["worker", "ingest", "metrics", "stats"])]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.ingest {
        handle_ingest(config, cli.run).await?;
    } else if cli.metrics {
        handle_metrics(config, cli.run).await?;
    } else {
        handle_crawl(config, &config_hash, !cli.worker).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("chart_ripple=info,warn"),
            1 => EnvFilter::new("chart_ripple=debug,info"),
            2 => EnvFilter::new("chart_ripple=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_queue(config: &Config, staging: chart_ripple::storage::SharedConnection) -> SqliteTaskQueue {
    SqliteTaskQueue::new(
        staging,
        Duration::from_secs(config.crawl.lease_secs),
        config.crawl.max_deliveries,
    )
}

/// Resolves `--run`, falling back to the latest run
fn resolve_run(orchestrator: &Orchestrator, run: Option<i64>) -> anyhow::Result<i64> {
    match run {
        Some(id) => Ok(orchestrator.staging().get_run(id)?.id),
        None => Ok(orchestrator
            .staging()
            .latest_run()?
            .ok_or(RippleError::NoRun)?
            .id),
    }
}

/// Handles the --dry-run mode: prints the validated configuration
fn handle_dry_run(config: &Config) {
    println!("=== Chart-Ripple Dry Run ===\n");

    println!("Fetch:");
    println!("  Max threads: {}", config.fetch.max_threads);
    println!("  Max retries: {}", config.fetch.max_retries);
    println!(
        "  Request delay: {}s - {}s",
        config.fetch.request_delay_range[0], config.fetch.request_delay_range[1]
    );
    println!("  Backoff base: {}ms", config.fetch.backoff_base_ms);
    println!("  User agents: {}", config.fetch.user_agents.len());

    println!("\nCrawl:");
    println!("  Categories page: {}", config.crawl.categories_url);
    println!("  Listing cap: {}", config.crawl.listing_cap);
    println!(
        "  Detail batches per hour: {}",
        config.crawl.detail_batches_per_hour
    );
    println!("  Fetch reviews: {}", config.crawl.fetch_reviews);
    println!("  Workers: {}", config.crawl.workers);
    println!("  Max deliveries: {}", config.crawl.max_deliveries);

    println!("\nIngest:");
    println!("  Batch size: {}", config.ingest.batch_size);

    println!("\nMetrics:");
    println!("  Enabled: {}", config.metrics.enabled);
    if config.metrics.enabled {
        println!("  URL template: {}", config.metrics.url_template);
        println!(
            "  Session cookie: {}",
            if config.metrics.session_cookie.is_some() {
                "configured"
            } else {
                "none"
            }
        );
    }

    println!("\nStorage:");
    println!("  Staging: {}", config.storage.staging_path);
    println!("  Canonical: {}", config.storage.canonical_path);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the databases
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Staging database: {}", config.storage.staging_path);
    println!("Canonical database: {}\n", config.storage.canonical_path);

    let staging_conn = open_staging(Path::new(&config.storage.staging_path))?;
    let canonical = SqliteCanonical::new(open_canonical(Path::new(&config.storage.canonical_path))?);
    let staging = SqliteStaging::new(staging_conn.clone());
    let progress = ProgressTracker::new(staging_conn.clone());
    let queue = open_queue(config, staging_conn);

    let stats = load_statistics(&staging, &canonical, &progress, &queue)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --ingest mode
async fn handle_ingest(config: Config, run: Option<i64>) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::open(config)?;
    let run_id = resolve_run(&orchestrator, run)?;

    let report = orchestrator.run_ingestion(run_id, false).await?;
    println!("Ingestion of run {}: {}", run_id, report);
    Ok(())
}

/// Handles the --metrics mode
async fn handle_metrics(config: Config, run: Option<i64>) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::open(config)?;
    let run_id = resolve_run(&orchestrator, run)?;

    let metrics = orchestrator.scrape_metrics(run_id).await?;
    let report = orchestrator.run_ingestion(run_id, true).await?;
    println!(
        "Metrics for run {}: {} staged, {} failed; {} merged, {} unmatched",
        run_id, metrics.staged, metrics.failed, report.metrics_merged, report.metrics_unmatched
    );
    Ok(())
}

/// Handles the default mode (start a run) and --worker mode (drain only)
async fn handle_crawl(config: Config, config_hash: &str, start_run: bool) -> anyhow::Result<()> {
    let staging = open_staging(Path::new(&config.storage.staging_path))?;
    let canonical = open_canonical(Path::new(&config.storage.canonical_path))?;
    let queue: Arc<dyn TaskQueue> = Arc::new(open_queue(&config, staging.clone()));
    let orchestrator = Arc::new(Orchestrator::new(config, staging, canonical)?);

    if start_run {
        let (run_id, task) = orchestrator.start_run(config_hash)?;
        queue.enqueue(&task)?;
        tracing::info!("Queued category discovery for run {}", run_id);
    } else {
        tracing::info!("Draining existing tasks");
    }

    let stats = WorkerPool::new(orchestrator, queue).run_until_idle().await?;
    if stats.dead > 0 {
        tracing::warn!(
            "{} tasks were dead-lettered; see --stats for details",
            stats.dead
        );
    }
    tracing::info!("Crawl finished");
    Ok(())
}
