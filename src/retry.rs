//! Bounded retry with capped exponential backoff, and fixed request pacing

use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::config::RetrySettings;
use crate::error::SyncError;

/// Retry policy for remote calls. Only transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
        }
    }

    /// Delay before the `retry`-th retry (1-based): `base * 2^(retry-1)`, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    pub fn run<T>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(SyncError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// Fixed minimum delay slept before every call to a rate-limited service
#[derive(Debug, Clone, Copy, Default)]
pub struct Throttle {
    interval: Duration,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn wait(&self) {
        if !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
    }
}
