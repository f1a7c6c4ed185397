//! Configuration module for Chart-Ripple
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and layering `CHART_RIPPLE_*` environment overrides on top of them.
//!
//! # Example
//!
//! ```no_run
//! use chart_ripple::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Fetch pool size: {}", config.fetch.max_threads);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, FetchConfig, IngestConfig, MetricsConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{
    apply_overrides, compute_config_hash, load_config, load_config_with_hash, ENV_PREFIX,
};
pub use validation::validate;
