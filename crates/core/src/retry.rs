//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::deadline::Deadline;

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jittered = if self.jitter > 0.0 {
            base * (1.0 + (rand::random::<f64>() - 0.5) * 2.0 * self.jitter)
        } else {
            base
        };
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, is_retryable: impl Fn(&E) -> bool, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_inner(None, is_retryable, op).await
    }

    /// Like [`run`](Self::run), but never sleeps past `deadline`: once it has
    /// expired, or the next backoff would end after it, the last error is
    /// returned.
    pub async fn run_within<T, E, F, Fut>(
        &self,
        deadline: Deadline,
        is_retryable: impl Fn(&E) -> bool,
        op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_inner(Some(deadline), is_retryable, op).await
    }

    async fn run_inner<T, E, F, Fut>(
        &self,
        deadline: Option<Deadline>,
        is_retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && is_retryable(&e) => {
                    let delay = self.delay_for_attempt(attempt - 1);
                    if deadline.is_some_and(|d| delay >= d.remaining()) {
                        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Deadline leaves no room to retry");
                        return Err(e);
                    }
                    debug!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
