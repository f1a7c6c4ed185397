//! Metrics enrichment client
//!
//! One authenticated client is built per enrichment task and reused for every
//! lookup. Lookups retry transient failures (network, 429, 5xx) on a fixed
//! delay, independently of the fetch layer's rate-limit backoff.

use crate::config::{FetchConfig, MetricsConfig};
use crate::fetch::{FetchError, Page, RetryError, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Session-authenticated metrics page client
pub struct MetricsClient {
    client: Client,
    url_template: String,
    policy: RetryPolicy,
}

impl MetricsClient {
    /// Builds the client for one enrichment task
    ///
    /// The session cookie, when configured, is sent with every request.
    pub fn new(metrics: &MetricsConfig, fetch: &FetchConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &metrics.session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|_| FetchError::InvalidHeader { name: "cookie" })?;
            headers.insert(COOKIE, value);
        }
        if let Some(agent) = fetch.user_agents.first() {
            let value = HeaderValue::from_str(agent)
                .map_err(|_| FetchError::InvalidHeader { name: "user-agent" })?;
            headers.insert(USER_AGENT, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(fetch.request_timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            url_template: metrics.url_template.clone(),
            policy: RetryPolicy::fixed(
                metrics.max_attempts,
                Duration::from_secs(metrics.backoff_secs),
            ),
        })
    }

    pub fn url_for(&self, external_id: &str) -> String {
        self.url_template.replace("{id}", external_id)
    }

    /// Fetches the metrics page of one id
    pub async fn fetch(&self, external_id: &str) -> Result<Page, FetchError> {
        let url = self.url_for(external_id);
        let result = self
            .policy
            .run(FetchError::is_transient, |_| self.fetch_once(&url))
            .await;

        match result {
            Ok(page) => Ok(page),
            Err(RetryError::Permanent(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => Err(FetchError::Exhausted {
                url,
                attempts,
                last: last.to_string(),
            }),
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Page, FetchError> {
        let response = self
            .client
            .get(url)
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
}
