//! Crawl orchestrator - task handlers of the crawl graph
//!
//! Each handler performs one task and returns the follow-up tasks it wants
//! enqueued; it never calls another stage directly. Handlers are safe to run
//! more than once for the same task:
//! - staging writes are inserts-if-absent or upserts
//! - `mark_done` reports run completion to exactly one caller
//! - a repeated discovery re-dispatches only the categories still remaining

use crate::config::Config;
use crate::crawl::metrics::MetricsClient;
use crate::extract::{AppStoreExtractor, Category, Extractor, ListType, RawDetail, RawListing};
use crate::fetch::{BatchLimiter, Fetcher};
use crate::ingest::{extract_external_id, IngestReport, Ingestor};
use crate::progress::{CategoryStage, ProgressTracker};
use crate::queue::Task;
use crate::storage::{
    open_canonical, open_staging, RunStatus, SharedConnection, SqliteCanonical, SqliteStaging,
    StagingStore,
};
use crate::Result;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of a metrics enrichment pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsReport {
    pub staged: usize,
    pub failed: usize,
}

/// Runs crawl tasks against the fetch layer and the stores
pub struct Orchestrator {
    config: Arc<Config>,
    fetcher: Arc<Fetcher>,
    extractor: Arc<dyn Extractor>,
    staging: SqliteStaging,
    progress: ProgressTracker,
    ingestor: Ingestor,
    batch_limiter: BatchLimiter,
}

impl Orchestrator {
    /// Creates an orchestrator over already opened databases
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `staging` - Staging database (staged documents, progress, queue)
    /// * `canonical` - Canonical database
    pub fn new(config: Config, staging: SharedConnection, canonical: SharedConnection) -> Result<Self> {
        let fetcher = Fetcher::new(&config.fetch)?;
        let staging_store = SqliteStaging::new(staging.clone());
        let ingestor = Ingestor::new(
            staging_store.clone(),
            SqliteCanonical::new(canonical),
            config.ingest.clone(),
        );

        Ok(Self {
            batch_limiter: BatchLimiter::per_hour(config.crawl.detail_batches_per_hour),
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            extractor: Arc::new(AppStoreExtractor::new()),
            staging: staging_store,
            progress: ProgressTracker::new(staging),
            ingestor,
        })
    }

    /// Opens both databases named in the configuration
    pub fn open(config: Config) -> Result<Self> {
        let staging = open_staging(Path::new(&config.storage.staging_path))?;
        let canonical = open_canonical(Path::new(&config.storage.canonical_path))?;
        Self::new(config, staging, canonical)
    }

    /// Replaces the extraction collaborator
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn staging(&self) -> &SqliteStaging {
        &self.staging
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Creates a run and returns the task that starts it
    pub fn start_run(&self, config_hash: &str) -> Result<(i64, Task)> {
        let run_id = self.staging.create_run(config_hash)?;
        tracing::info!("Started run {}", run_id);
        Ok((run_id, Task::DiscoverCategories { run_id }))
    }

    /// Executes one task
    ///
    /// # Returns
    ///
    /// The follow-up tasks to enqueue. An `Err` means the task should be
    /// redelivered; per-item failures are logged and skipped instead.
    pub async fn handle(&self, task: &Task) -> Result<Vec<Task>> {
        match task {
            Task::DiscoverCategories { run_id } => self.discover_categories(*run_id).await,
            Task::ScrapeCategory { run_id, category } => {
                self.scrape_category(*run_id, category).await
            }
            Task::ScrapeDetails {
                run_id,
                category,
                urls,
            } => self.scrape_details(*run_id, category, urls).await,
            Task::RunIngestion {
                run_id,
                metrics_only,
            } => {
                self.run_ingestion(*run_id, *metrics_only).await?;
                Ok(Vec::new())
            }
            Task::ScrapeMetrics { run_id } => {
                self.scrape_metrics(*run_id).await?;
                Ok(vec![Task::RunIngestion {
                    run_id: *run_id,
                    metrics_only: true,
                }])
            }
        }
    }

    async fn discover_categories(&self, run_id: i64) -> Result<Vec<Task>> {
        if let Some(snapshot) = self.progress.snapshot(run_id)? {
            tracing::info!(
                "Run {} already discovered; re-dispatching {} remaining categories",
                run_id,
                snapshot.remaining.len()
            );
            let tasks = self
                .staging
                .categories(run_id)?
                .into_iter()
                .filter(|c| snapshot.remaining.contains(&c.name))
                .map(|category| Task::ScrapeCategory { run_id, category })
                .collect();
            return Ok(tasks);
        }

        let page = self.fetcher.fetch(&self.config.crawl.categories_url).await?;
        self.fetcher.pacer().pause().await;
        let categories = self.extractor.categories(&page)?;

        if categories.is_empty() {
            tracing::warn!("No categories found on {}", page.url);
            self.staging.set_run_status(run_id, RunStatus::Failed)?;
            return Ok(Vec::new());
        }

        tracing::info!("Discovered {} categories for run {}", categories.len(), run_id);
        let names: Vec<String> = categories.iter().map(|c| c.name.clone()).collect();
        self.staging.stage_categories(run_id, &categories)?;
        self.progress.init_run(run_id, &names)?;

        Ok(categories
            .into_iter()
            .map(|category| Task::ScrapeCategory { run_id, category })
            .collect())
    }

    /// Fetches the category page and each of its ranked lists
    ///
    /// Fetch and extraction failures leave the category with fewer (possibly
    /// zero) listings; they never fail the task.
    async fn fetch_listings(&self, category: &Category) -> Vec<RawListing> {
        let page = match self.fetcher.fetch(&category.source_url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("Skipping category {}: {}", category.name, e);
                return Vec::new();
            }
        };
        self.fetcher.pacer().pause().await;

        let lists = match self.extractor.list_links(&page) {
            Ok(links) => links.present(),
            Err(e) => {
                tracing::warn!("No list links for {}: {}", category.name, e);
                return Vec::new();
            }
        };

        let mut listings = Vec::new();
        for (list_type, url) in lists {
            listings.extend(self.fetch_list(category, list_type, &url).await);
        }
        listings
    }

    async fn fetch_list(&self, category: &Category, list_type: ListType, url: &str) -> Vec<RawListing> {
        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("Skipping {} list of {}: {}", list_type, category.name, e);
                return Vec::new();
            }
        };
        self.fetcher.pacer().pause().await;

        match self.extractor.listings(&page, &category.name, list_type) {
            Ok(mut listings) => {
                listings.truncate(self.config.crawl.listing_cap);
                tracing::info!(
                    "Found {} apps in {} - {}",
                    listings.len(),
                    category.name,
                    list_type
                );
                listings
            }
            Err(e) => {
                tracing::warn!("Failed to extract {} list of {}: {}", list_type, category.name, e);
                Vec::new()
            }
        }
    }

    async fn scrape_category(&self, run_id: i64, category: &Category) -> Result<Vec<Task>> {
        let listings = self.fetch_listings(category).await;
        self.staging.stage_listings(run_id, &listings)?;
        self.progress
            .advance_stage(run_id, &category.name, CategoryStage::ListingsFetched)?;

        if listings.is_empty() {
            tracing::warn!("No listings for {}; marking it done", category.name);
            return self.complete_category(run_id, &category.name);
        }

        let mut seen = HashSet::new();
        let urls: Vec<String> = listings
            .into_iter()
            .map(|l| l.source_url)
            .filter(|url| seen.insert(url.clone()))
            .collect();

        self.progress
            .advance_stage(run_id, &category.name, CategoryStage::DetailsDispatched)?;
        Ok(vec![Task::ScrapeDetails {
            run_id,
            category: category.name.clone(),
            urls,
        }])
    }

    async fn scrape_details(
        &self,
        run_id: i64,
        category: &str,
        urls: &[String],
    ) -> Result<Vec<Task>> {
        self.batch_limiter.acquire().await;
        tracing::info!("Fetching {} details for {}", urls.len(), category);

        let semaphore = Arc::new(Semaphore::new(self.config.fetch.max_threads.max(1) as usize));
        let mut pending = JoinSet::new();
        for url in urls {
            let url = url.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let extractor = Arc::clone(&self.extractor);
            let semaphore = Arc::clone(&semaphore);
            let fetch_reviews = self.config.crawl.fetch_reviews;
            pending.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                fetch_detail(&fetcher, extractor.as_ref(), &url, fetch_reviews).await
            });
        }

        let mut staged = 0;
        let mut failed = 0;
        while let Some(joined) = pending.join_next().await {
            match joined? {
                Some(detail) => {
                    self.staging.stage_detail(&detail)?;
                    staged += 1;
                }
                None => failed += 1,
            }
        }
        tracing::info!(
            "Staged {} details for {} ({} skipped)",
            staged,
            category,
            failed
        );

        self.complete_category(run_id, category)
    }

    /// Marks a category done and, for the call that finishes the run, returns
    /// the completion follow-ups
    fn complete_category(&self, run_id: i64, category: &str) -> Result<Vec<Task>> {
        if !self.progress.mark_done(run_id, category)? {
            return Ok(Vec::new());
        }

        tracing::info!("All categories of run {} are done", run_id);
        self.staging.set_run_status(run_id, RunStatus::Completed)?;

        let mut tasks = vec![Task::RunIngestion {
            run_id,
            metrics_only: false,
        }];
        if self.config.metrics.enabled {
            tasks.push(Task::ScrapeMetrics { run_id });
        }
        Ok(tasks)
    }

    /// Runs ingestion on the blocking pool
    pub async fn run_ingestion(&self, run_id: i64, metrics_only: bool) -> Result<IngestReport> {
        let ingestor = self.ingestor.clone();
        tokio::task::spawn_blocking(move || ingestor.run(run_id, metrics_only)).await?
    }

    /// Stages a metrics snapshot for every item listed in the run
    pub async fn scrape_metrics(&self, run_id: i64) -> Result<MetricsReport> {
        let marker = &self.config.ingest.external_id_marker;
        let mut seen = HashSet::new();
        let ids: Vec<String> = self
            .staging
            .listing_urls(run_id)?
            .iter()
            .filter_map(|url| extract_external_id(url, marker))
            .filter(|id| seen.insert(id.clone()))
            .collect();

        tracing::info!("Collecting metrics for {} apps of run {}", ids.len(), run_id);
        let client = MetricsClient::new(&self.config.metrics, &self.config.fetch)?;
        let mut report = MetricsReport::default();

        for id in &ids {
            let snapshot = match client.fetch(id).await {
                Ok(page) => self.extractor.metrics(&page),
                Err(e) => {
                    tracing::warn!("Metrics lookup failed for {}: {}", id, e);
                    report.failed += 1;
                    continue;
                }
            };
            match snapshot {
                Ok(snapshot) => {
                    self.staging.stage_metric(id, &snapshot)?;
                    report.staged += 1;
                }
                Err(e) => {
                    tracing::warn!("Could not read metrics for {}: {}", id, e);
                    report.failed += 1;
                }
            }
            self.fetcher.pacer().pause().await;
        }

        tracing::info!(
            "Staged metrics for {} apps ({} failed)",
            report.staged,
            report.failed
        );
        Ok(report)
    }
}

/// Fetches and extracts one detail page (plus its reviews when enabled)
///
/// Returns `None` when the item has to be skipped.
async fn fetch_detail(
    fetcher: &Fetcher,
    extractor: &dyn Extractor,
    url: &str,
    fetch_reviews: bool,
) -> Option<RawDetail> {
    let page = match fetcher.fetch(url).await {
        Ok(page) => page,
        Err(e) => {
            tracing::warn!("Skipping detail {}: {}", url, e);
            return None;
        }
    };
    fetcher.pacer().pause().await;

    let mut detail = match extractor.detail(&page) {
        Ok(detail) => detail,
        Err(e) => {
            tracing::warn!("Failed to extract detail {}: {}", url, e);
            return None;
        }
    };

    if fetch_reviews {
        let reviews_url = format!("{}?see-all=reviews", url);
        match fetcher.fetch(&reviews_url).await {
            Ok(page) => {
                fetcher.pacer().pause().await;
                match extractor.reviews(&page) {
                    Ok(reviews) => detail.reviews = reviews,
                    Err(e) => tracing::warn!("Failed to extract reviews {}: {}", reviews_url, e),
                }
            }
            Err(e) => tracing::warn!("Keeping {} without reviews: {}", url, e),
        }
    }

    Some(detail)
}
