use crate::config::types::{
    Config, CrawlConfig, FetchConfig, IngestConfig, MetricsConfig, StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetch_config(&config.fetch)?;
    validate_crawl_config(&config.crawl)?;
    validate_ingest_config(&config.ingest)?;
    validate_metrics_config(&config.metrics)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates outbound request configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_threads < 1 || config.max_threads > 64 {
        return Err(ConfigError::Validation(format!(
            "max_threads must be between 1 and 64, got {}",
            config.max_threads
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    let [min, max] = config.request_delay_range;
    if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
        return Err(ConfigError::Validation(format!(
            "request_delay_range must satisfy 0 <= min <= max, got [{}, {}]",
            min, max
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.user_agents.is_empty() {
        return Err(ConfigError::Validation(
            "user_agents must contain at least one entry".to_string(),
        ));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawl and task queue configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    Url::parse(&config.categories_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid categories_url: {}", e)))?;

    if config.listing_cap < 1 {
        return Err(ConfigError::Validation(
            "listing_cap must be >= 1".to_string(),
        ));
    }

    if config.detail_batches_per_hour < 1 {
        return Err(ConfigError::Validation(format!(
            "detail_batches_per_hour must be >= 1, got {}",
            config.detail_batches_per_hour
        )));
    }

    if config.workers < 1 {
        return Err(ConfigError::Validation("workers must be >= 1".to_string()));
    }

    if config.max_deliveries < 1 {
        return Err(ConfigError::Validation(
            "max_deliveries must be >= 1".to_string(),
        ));
    }

    if config.lease_secs < 1 {
        return Err(ConfigError::Validation("lease_secs must be >= 1".to_string()));
    }

    Ok(())
}

fn validate_ingest_config(config: &IngestConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.external_id_marker.is_empty() {
        return Err(ConfigError::Validation(
            "external_id_marker cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_metrics_config(config: &MetricsConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    if !config.url_template.contains("{id}") {
        return Err(ConfigError::Validation(format!(
            "metrics url_template must contain '{{id}}', got '{}'",
            config.url_template
        )));
    }

    Url::parse(&config.url_template.replace("{id}", "0"))
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid metrics url_template: {}", e)))?;

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "metrics max_attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.staging_path.is_empty() {
        return Err(ConfigError::Validation(
            "staging_path cannot be empty".to_string(),
        ));
    }

    if config.canonical_path.is_empty() {
        return Err(ConfigError::Validation(
            "canonical_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
