use serde::Deserialize;

/// Main configuration structure for Chart-Ripple
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fetch: FetchConfig,
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub storage: StorageConfig,
}

/// Outbound request behavior
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Size of the per-task fetch worker pool
    #[serde(rename = "max-threads")]
    pub max_threads: u32,

    /// Attempts allowed per request while the source keeps rate limiting
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Randomized pause after each successful request, `[min, max]` seconds
    #[serde(rename = "request-delay-range")]
    pub request_delay_range: [f64; 2],

    /// Backoff unit; the wait before retry `n` is `base * 2^n`
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// User-agent pool; one is picked at random for each request
    #[serde(rename = "user-agents")]
    pub user_agents: Vec<String>,
}

/// Crawl orchestration and task queue behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Charts page listing every category
    #[serde(rename = "categories-url")]
    pub categories_url: String,

    /// Maximum ranked listings kept per list page
    #[serde(rename = "listing-cap", default = "default_listing_cap")]
    pub listing_cap: usize,

    /// Global cap on detail batches started per hour
    #[serde(rename = "detail-batches-per-hour", default = "default_batches_per_hour")]
    pub detail_batches_per_hour: u32,

    /// Also fetch the reviews page of each item
    #[serde(rename = "fetch-reviews", default)]
    pub fetch_reviews: bool,

    /// Number of task-queue workers in this process
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Deliveries before a failing task is moved to the dead-letter state
    #[serde(rename = "max-deliveries", default = "default_max_deliveries")]
    pub max_deliveries: u32,

    /// How long a leased task stays invisible to other workers
    #[serde(rename = "lease-secs", default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Idle poll interval while other workers still hold leases
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Ingestion pipeline behavior
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Token in a source URL after which the external id starts
    #[serde(rename = "external-id-marker", default = "default_id_marker")]
    pub external_id_marker: String,

    /// chrono format of "latest version" dates
    #[serde(rename = "date-format", default = "default_date_format")]
    pub date_format: String,
}

/// Secondary metrics enrichment
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Metrics page for one id; `{id}` is replaced by the external id
    #[serde(rename = "url-template", default = "default_metrics_template")]
    pub url_template: String,

    #[serde(rename = "max-attempts", default = "default_metrics_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "backoff-secs", default = "default_metrics_backoff")]
    pub backoff_secs: u64,

    /// Cookie header of an already authenticated session
    #[serde(rename = "session-cookie", default)]
    pub session_cookie: Option<String>,
}

/// Database locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding staged documents, progress and the task queue
    #[serde(rename = "staging-path")]
    pub staging_path: String,

    /// SQLite file holding the canonical app table
    #[serde(rename = "canonical-path")]
    pub canonical_path: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            external_id_marker: default_id_marker(),
            date_format: default_date_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url_template: default_metrics_template(),
            max_attempts: default_metrics_attempts(),
            backoff_secs: default_metrics_backoff(),
            session_cookie: None,
        }
    }
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_listing_cap() -> usize {
    100
}

fn default_batches_per_hour() -> u32 {
    60
}

fn default_workers() -> u32 {
    4
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_lease_secs() -> u64 {
    900
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_batch_size() -> usize {
    50
}

fn default_id_marker() -> String {
    "/id".to_string()
}

fn default_date_format() -> String {
    "%b %d, %Y".to_string()
}

fn default_metrics_template() -> String {
    "https://app.sensortower.com/overview/{id}?country=US".to_string()
}

fn default_metrics_attempts() -> u32 {
    3
}

fn default_metrics_backoff() -> u64 {
    5
}
