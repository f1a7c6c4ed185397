//! Reusable retry policy
//!
//! A policy is a maximum number of attempts plus a backoff function. The
//! caller decides which errors are retryable, so each call site can use its
//! own predicate with the same loop.

use std::future::Future;
use std::time::Duration;

/// How long to wait before the next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^attempt`, attempt counted from 0
    Exponential { base: Duration },

    /// The same wait after every failed attempt
    Fixed(Duration),
}

impl Backoff {
    /// Wait that follows failed attempt number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Exponential { base } => {
                base.saturating_mul(2u32.saturating_pow(attempt))
            }
            Backoff::Fixed(delay) => delay,
        }
    }
}

/// Maximum attempts plus a backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// The predicate rejected the error; no further attempts were made
    Permanent(E),

    /// Every allowed attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
}

impl RetryPolicy {
    /// Exponential policy: waits of `base`, `2 * base`, `4 * base`, ...
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base },
        }
    }

    /// Fixed-delay policy
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Waits that would separate the attempts if every attempt failed
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.attempts().saturating_sub(1))
            .map(|attempt| self.backoff.delay(attempt))
            .collect()
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, E, F, Fut, P>(&self, is_retryable: P, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.attempts();
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(RetryError::Permanent(e)),
                Err(e) => {
                    if attempt + 1 >= max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt + 1,
                            last: e,
                        });
                    }

                    let wait = self.backoff.delay(attempt);
                    tracing::warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        max_attempts,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
