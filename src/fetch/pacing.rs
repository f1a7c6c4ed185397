//! Request pacing
//!
//! Two independent brakes on load against the source:
//! - `Pacer`: a randomized pause after each successful request
//! - `BatchLimiter`: a global hourly quota on detail batches

use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use rand::Rng;
use std::num::NonZeroU32;
use std::time::Duration;

/// Jittered inter-request delay drawn from `[min, max]` seconds
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    min_secs: f64,
    max_secs: f64,
}

impl Pacer {
    pub fn new(range: [f64; 2]) -> Self {
        let [min, max] = range;
        let min_secs = min.max(0.0);
        Self {
            min_secs,
            max_secs: max.max(min_secs),
        }
    }

    /// Draws the next delay
    pub fn next_delay(&self) -> Duration {
        if self.max_secs <= self.min_secs {
            return Duration::from_secs_f64(self.min_secs);
        }
        let secs = rand::thread_rng().gen_range(self.min_secs..=self.max_secs);
        Duration::from_secs_f64(secs)
    }

    /// Sleeps for a freshly drawn delay
    pub async fn pause(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        tracing::debug!("Waiting {:.2}s before the next request", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}

/// Caps how many detail batches may start per hour across all workers of a process
pub struct BatchLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    per_hour: u32,
}

impl BatchLimiter {
    pub fn per_hour(batches: u32) -> Self {
        let quota = NonZeroU32::new(batches).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_hour(quota)),
            per_hour: quota.get(),
        }
    }

    /// Waits until the quota admits one more batch
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            tracing::info!(
                "Detail batch quota of {}/hour reached, waiting for capacity",
                self.per_hour
            );
            self.limiter.until_ready().await;
        }
    }

    /// Takes one unit of quota if available without waiting
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
