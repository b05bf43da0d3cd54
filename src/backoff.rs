//! Exponential backoff for failed reconciles and transient startup calls
//!
//! [`KeyedBackoff`] tracks consecutive failures per object and hands out the
//! delay before the next attempt. [`retry_with_backoff`] is the same
//! schedule applied to a single async operation.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, warn};

/// Exponential backoff parameters
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Factor applied per consecutive failure
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Default schedule with a different ceiling
    pub fn with_max_delay(max_delay: Duration) -> Self {
        Self {
            max_delay,
            ..Default::default()
        }
    }

    /// Delay before the attempt following `failures` consecutive failures
    ///
    /// `failures` counts from 1; zero yields no delay.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Per-key failure counter driving [`BackoffConfig`]
#[derive(Debug)]
pub struct KeyedBackoff<K> {
    config: BackoffConfig,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> KeyedBackoff<K> {
    /// Create a tracker using the given schedule
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying it
    pub fn next_delay(&self, key: &K) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        self.config.delay_for(*count)
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &K) {
        self.failures.lock().remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &K) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

/// Execute an async operation until it succeeds or `max_attempts` is reached
///
/// `max_attempts` of 0 retries forever.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &BackoffConfig,
    max_attempts: u32,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if max_attempts > 0 && attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = config.delay_for(attempt);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
