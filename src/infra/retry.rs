//! Retry with exponential backoff and jitter
//!
//! Used for calls to the face capability sidecar and the camera, whose
//! failures are usually transient. Only errors that report themselves as
//! retryable are retried.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

use super::CheckinError;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Caps exponential growth
    pub max_delay: Duration,
    pub multiplier: f64,
    /// 0.0 = fixed delays, 1.0 = anywhere from 0 to 2x the computed delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::face_service()
    }
}

impl RetryConfig {
    /// Face detection / embedding sidecar: short, since requests are interactive
    pub fn face_service() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }

    /// Camera snapshot polling
    pub fn camera() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::face_service()
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..=range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}

/// Runs operations under a [`RetryConfig`]
#[derive(Debug, Clone, Default)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying while it fails with a retryable error.
    ///
    /// `context` names the operation in logs.
    pub async fn run<F, Fut, T>(&self, context: &str, operation: F) -> Result<T, CheckinError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CheckinError>>,
    {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(
                            context,
                            attempts,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempts > self.config.max_retries => {
                    tracing::warn!(
                        context,
                        attempts,
                        error = %e,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "operation failed after all retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.config.delay_for_attempt(attempts - 1);
                    tracing::debug!(
                        context,
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "operation failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
