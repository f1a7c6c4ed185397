//! HTTP fetcher implementation
//!
//! This module handles all outbound requests to the catalog source, including:
//! - Building the HTTP client with timeouts and compression
//! - Rotating the user agent on every request
//! - Backing off exponentially while the source answers 429
//! - Classifying every other failure for the caller

use crate::config::FetchConfig;
use crate::fetch::retry::{RetryError, RetryPolicy};
use crate::fetch::{FetchError, Page, Pacer};
use rand::seq::SliceRandom;
use reqwest::{header::USER_AGENT, Client, StatusCode};
use std::time::Duration;

/// Retrying, identity-rotating HTTP fetcher
///
/// One fetcher is shared by every worker of a process; it is cheap to borrow
/// and holds no per-request state.
pub struct Fetcher {
    client: Client,
    user_agents: Vec<String>,
    policy: RetryPolicy,
    pacer: Pacer,
}

/// Builds an HTTP client with the configured timeout
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

impl Fetcher {
    /// Creates a fetcher from the fetch configuration
    ///
    /// The 429 policy allows `max_retries` attempts with waits of
    /// `backoff_base_ms * 2^attempt`.
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = build_http_client(config)?;
        let policy = RetryPolicy::exponential(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
        );

        Ok(Self {
            client,
            user_agents: config.user_agents.clone(),
            policy,
            pacer: Pacer::new(config.request_delay_range),
        })
    }

    /// The inter-request pacer callers apply after a successful fetch
    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetches a URL, retrying rate-limit and network failures
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | HTTP 2xx | Return the page |
    /// | HTTP 429 | Retry with exponential backoff, up to `max_retries` attempts |
    /// | Timeout / connection error | Retry with the same backoff |
    /// | Any other status | Fail immediately with `FetchError::Status` |
    ///
    /// Once attempts run out the result is `FetchError::Exhausted`, which callers
    /// treat as "skip this unit of work".
    pub async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let result = self
            .policy
            .run(
                |e: &FetchError| e.is_rate_limited() || e.is_network(),
                |attempt| self.fetch_once(url, attempt),
            )
            .await;

        match result {
            Ok(page) => Ok(page),
            Err(RetryError::Permanent(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!("Failed after {} attempts. Skipping {}", attempts, url);
                Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts,
                    last: last.to_string(),
                })
            }
        }
    }

    async fn fetch_once(&self, url: &str, attempt: u32) -> Result<Page, FetchError> {
        let user_agent = self.pick_user_agent();
        tracing::debug!("GET {} (attempt {})", url, attempt + 1);

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|source| FetchError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                url: url.to_string(),
            });
        }

        if !status.is_success() {
            tracing::error!("Error accessing {}: {}", url, status);
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })?;

        Ok(Page {
            url: url.to_string(),
            final_url,
            status: status.as_u16(),
            body,
        })
    }

    fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or("chart-ripple")
    }
}
