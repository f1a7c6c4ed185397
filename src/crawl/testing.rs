//! Shared configuration for crawl-layer tests

use crate::config::{
    Config, CrawlConfig, FetchConfig, IngestConfig, MetricsConfig, StorageConfig,
};

/// A fast configuration whose charts page lives on `base_url`
pub(crate) fn test_config(base_url: &str) -> Config {
    Config {
        fetch: FetchConfig {
            max_threads: 4,
            max_retries: 2,
            request_delay_range: [0.0, 0.0],
            backoff_base_ms: 1,
            request_timeout_secs: 5,
            user_agents: vec!["TestAgent/1.0".to_string()],
        },
        crawl: CrawlConfig {
            categories_url: format!("{}/charts", base_url),
            listing_cap: 100,
            detail_batches_per_hour: 3600,
            fetch_reviews: false,
            workers: 1,
            max_deliveries: 3,
            lease_secs: 60,
            poll_interval_ms: 10,
        },
        ingest: IngestConfig::default(),
        metrics: MetricsConfig::default(),
        storage: StorageConfig {
            staging_path: ":memory:".to_string(),
            canonical_path: ":memory:".to_string(),
        },
    }
}
