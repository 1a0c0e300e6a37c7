// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! The same exponential schedule drives two things: retrying transient
//! storage failures in-process, and pushing the next sync of a failing
//! data type further out after each consecutive error.
//!
//! # Example
//!
//! ```
//! use history_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Query: quick retry, then fail
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, Some(3));
//!
//! // Backoff between failing sync cycles
//! let backoff = RetryConfig::backoff(Duration::from_secs(60), Duration::from_secs(3600), 2.0);
//! assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(240));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for connection/operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Fast-fail for initial connections
/// - [`RetryConfig::query()`] - Quick retry for individual operations
/// - [`RetryConfig::backoff()`] - Delay schedule for failing sync cycles
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Fast-fail retry for initial startup connection.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Quick retry for individual queries (don't block forever).
    /// 3 attempts with fast backoff - if it fails, let caller handle it.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Unbounded schedule used to space out failing sync cycles.
    #[must_use]
    pub fn backoff(initial_delay: Duration, max_delay: Duration, factor: f64) -> Self {
        Self {
            max_retries: None,
            initial_delay,
            max_delay,
            factor,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before the given 1-based attempt: `initial * factor^(attempt-1)`,
    /// capped at `max_delay`. Attempt 0 means no delay.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = (attempt - 1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.factor.max(1.0).powi(exp);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                match config.max_retries {
                    Some(max) if attempts >= max => return Err(err),
                    Some(max) => warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempts, max, err, delay
                    ),
                    None => warn!(
                        "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, attempts, err, delay
                    ),
                }

                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}
