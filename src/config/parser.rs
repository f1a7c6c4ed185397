use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "CHART_RIPPLE_";

/// Loads and parses a configuration file from the given path
///
/// Environment overrides are applied after parsing and before validation.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;

    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Applies `CHART_RIPPLE_*` overrides using the given variable lookup
///
/// The lookup receives the full variable name, e.g. `CHART_RIPPLE_MAX_THREADS`.
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

    if let Some(value) = var("MAX_THREADS") {
        config.fetch.max_threads = parse_override("MAX_THREADS", &value)?;
    }
    if let Some(value) = var("MAX_RETRIES") {
        config.fetch.max_retries = parse_override("MAX_RETRIES", &value)?;
    }
    if let Some(value) = var("REQUEST_DELAY_MIN") {
        config.fetch.request_delay_range[0] = parse_override("REQUEST_DELAY_MIN", &value)?;
    }
    if let Some(value) = var("REQUEST_DELAY_MAX") {
        config.fetch.request_delay_range[1] = parse_override("REQUEST_DELAY_MAX", &value)?;
    }
    if let Some(value) = var("BATCH_SIZE") {
        config.ingest.batch_size = parse_override("BATCH_SIZE", &value)?;
    }
    if let Some(value) = var("METRICS_SESSION_COOKIE") {
        config.metrics.session_cookie = Some(value);
    }
    if let Some(value) = var("STAGING_PATH") {
        config.storage.staging_path = value;
    }
    if let Some(value) = var("CANONICAL_PATH") {
        config.storage.canonical_path = value;
    }

    Ok(())
}

fn parse_override<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::Validation(format!(
            "{}{} has an invalid value: '{}'",
            ENV_PREFIX, name, value
        ))
    })
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Each crawl run records this hash so runs can be traced back to their settings.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
