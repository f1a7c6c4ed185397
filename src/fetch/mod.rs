//! Fetch layer
//!
//! This module contains everything that talks to the catalog source:
//! - A reusable retry policy (attempt cap + backoff + retryable predicate)
//! - Jittered inter-request pacing and the hourly detail-batch quota
//! - The retrying, user-agent rotating HTTP fetcher

mod fetcher;
mod pacing;
mod retry;

pub use fetcher::{build_http_client, Fetcher};
pub use pacing::{BatchLimiter, Pacer};
pub use retry::{Backoff, RetryError, RetryPolicy};

use thiserror::Error;

/// A fetched page
#[derive(Debug, Clone)]
pub struct Page {
    /// The URL that was requested
    pub url: String,

    /// URL after redirects
    pub final_url: String,

    /// HTTP status code
    pub status: u16,

    /// Response body
    pub body: String,
}

impl Page {
    /// Builds a page from an in-memory body (used by extraction tests)
    pub fn from_body(url: &str, body: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            body: body.into(),
        }
    }
}

/// Errors raised while fetching pages
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Rate limited (HTTP 429) at {url}")]
    RateLimited { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Gave up on {url} after {attempts} attempts (last error: {last})")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid header value for {name}")]
    InvalidHeader { name: &'static str },
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Timeouts and connection failures
    pub fn is_network(&self) -> bool {
        match self {
            Self::Network { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            _ => false,
        }
    }

    /// Errors worth another attempt: rate limiting, network trouble, 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500,
            _ => self.is_rate_limited() || self.is_network(),
        }
    }
}
