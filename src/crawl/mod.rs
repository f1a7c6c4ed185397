//! Crawl layer
//!
//! - `Orchestrator`: task handlers of the crawl graph
//! - `WorkerPool`: tokio workers draining the task queue
//! - `MetricsClient`: session-authenticated metrics lookups

mod metrics;
mod orchestrator;
mod worker;

#[cfg(test)]
mod testing;

pub use metrics::MetricsClient;
pub use orchestrator::{MetricsReport, Orchestrator};
pub use worker::{WorkerPool, WorkerStats};
