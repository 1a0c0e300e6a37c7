// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker pattern using recloser crate.
//!
//! Protects the remote API from being hammered while it is failing. Each
//! owner gets its own breaker per data type so one broken endpoint, or one
//! owner with revoked access, doesn't stop the others from syncing.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Endpoint unhealthy, requests fail-fast without attempting
//! - HalfOpen: Testing if endpoint recovered, limited requests allowed

use dashmap::DashMap;
use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::data_type::DataType;
use crate::record::OwnerId;

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> From<RecloserError<E>> for CircuitError<E> {
    fn from(err: RecloserError<E>) -> Self {
        match err {
            RecloserError::Rejected => CircuitError::Rejected,
            RecloserError::Inner(e) => CircuitError::Inner(e),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes in half-open to close circuit
    pub success_threshold: u32,
    /// How long to wait before attempting recovery (half-open)
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        }
    }

    /// Failure rate over the last `failure_threshold` calls that trips the
    /// breaker. Only a window made entirely of failures reaches it.
    fn error_rate(&self) -> f32 {
        let window = self.failure_threshold.max(1) as f32;
        1.0 - 0.5 / window
    }
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(config.error_rate())
            .closed_len(config.failure_threshold.max(1) as usize)
            .half_open_len(config.success_threshold.max(1) as usize)
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an async operation through the circuit breaker
    ///
    /// Takes a closure that returns a Future, allowing lazy evaluation
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        match self.inner.call(f()).await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit call succeeded");
                crate::metrics::record_circuit_breaker_call(&self.name, "success");
                Ok(result)
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                crate::metrics::record_circuit_breaker_call(&self.name, "rejected");
                Err(CircuitError::Rejected)
            }
            Err(RecloserError::Inner(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit call failed");
                crate::metrics::record_circuit_breaker_call(&self.name, "failure");
                Err(CircuitError::Inner(e))
            }
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }
}

/// One breaker per (owner, endpoint), created on first use.
///
/// Remote failures are usually owner-scoped (revoked token, missing role),
/// so a broken owner only trips its own breaker. Breakers for the same data
/// type share a metrics label.
pub struct RemoteCircuits {
    config: CircuitConfig,
    circuits: DashMap<(OwnerId, DataType), Arc<CircuitBreaker>>,
}

impl Default for RemoteCircuits {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

impl RemoteCircuits {
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// The breaker guarding `owner`'s calls to `data_type`'s endpoint.
    pub fn for_endpoint(&self, owner: OwnerId, data_type: DataType) -> Arc<CircuitBreaker> {
        self.circuits
            .entry((owner, data_type))
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    format!("remote_{}", data_type.as_str()),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    /// Snapshot of per-breaker counters, ordered by owner then data type.
    pub fn metrics(&self) -> Vec<RemoteCircuitMetrics> {
        let mut out: Vec<_> = self
            .circuits
            .iter()
            .map(|entry| {
                let (owner, data_type) = *entry.key();
                RemoteCircuitMetrics {
                    owner,
                    data_type,
                    calls: entry.calls_total(),
                    successes: entry.successes(),
                    failures: entry.failures(),
                    rejections: entry.rejections(),
                }
            })
            .collect();
        out.sort_by_key(|m| (m.owner, m.data_type));
        out
    }
}

/// Counters of one owner's breaker for one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCircuitMetrics {
    pub owner: OwnerId,
    pub data_type: DataType,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_circuit_passes_successful_calls() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());

        let result: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.successes(), 1);
        assert_eq!(cb.failures(), 0);
    }

    #[tokio::test]
    async fn test_circuit_tracks_failures() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());

        let result: Result<i32, CircuitError<&str>> = cb.call(|| async { Err("boom") }).await;

        assert!(matches!(result, Err(CircuitError::Inner("boom"))));
        assert_eq!(cb.successes(), 0);
        assert_eq!(cb.failures(), 1);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_consecutive_failures() {
        let config = CircuitConfig {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        };
        let cb = CircuitBreaker::new("test", config);

        for _ in 0..3 {
            let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Err("fail") }).await;
        }

        let result: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(42) }).await;
        assert!(matches!(result, Err(CircuitError::Rejected)));
        assert_eq!(cb.rejections(), 1);
    }

    #[tokio::test]
    async fn test_circuit_tolerates_mixed_results() {
        let config = CircuitConfig {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        };
        let cb = CircuitBreaker::new("test", config);

        // Two failures in every window of three never trips the breaker
        for i in 0..9 {
            let _: Result<i32, CircuitError<&str>> = cb
                .call(|| async move { if i % 3 == 0 { Ok(1) } else { Err("x") } })
                .await;
        }

        assert_eq!(cb.rejections(), 0);
    }

    #[tokio::test]
    async fn test_failure_rate_calculation() {
        let config = CircuitConfig {
            failure_threshold: 100,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        };
        let cb = CircuitBreaker::new("test", config);

        let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(1) }).await;
        let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Err("x") }).await;
        let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(2) }).await;
        let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Err("y") }).await;

        assert!((cb.failure_rate() - 0.5).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_circuit_with_async_state() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        let result: Result<usize, CircuitError<&str>> = cb
            .call(|| async move {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                Ok(counter_clone.load(Ordering::SeqCst))
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_circuits_are_per_owner_and_type() {
        let circuits = RemoteCircuits::new(CircuitConfig::test());
        let broken = OwnerId(1);
        let healthy = OwnerId(2);

        let assets = circuits.for_endpoint(broken, DataType::Assets);
        assert_eq!(assets.name(), "remote_assets");
        assert!(Arc::ptr_eq(&assets, &circuits.for_endpoint(broken, DataType::Assets)));

        for _ in 0..2 {
            let _: Result<i32, CircuitError<&str>> = assets.call(|| async { Err("down") }).await;
        }
        let rejected: Result<i32, CircuitError<&str>> = assets.call(|| async { Ok(1) }).await;
        assert!(matches!(rejected, Err(CircuitError::Rejected)));

        // Another endpoint of the same owner is unaffected
        let skills = circuits.for_endpoint(broken, DataType::Skills);
        let ok: Result<i32, CircuitError<&str>> = skills.call(|| async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        // So is the same endpoint for another owner
        let other = circuits.for_endpoint(healthy, DataType::Assets);
        assert!(!Arc::ptr_eq(&assets, &other));
        let ok: Result<i32, CircuitError<&str>> = other.call(|| async { Ok(2) }).await;
        assert_eq!(ok.unwrap(), 2);

        let metrics = circuits.metrics();
        assert_eq!(metrics.len(), 3);
        let broken_assets = metrics
            .iter()
            .find(|m| m.owner == broken && m.data_type == DataType::Assets)
            .unwrap();
        assert_eq!(broken_assets.failures, 2);
        assert_eq!(broken_assets.rejections, 1);
        let healthy_assets = metrics.iter().find(|m| m.owner == healthy).unwrap();
        assert_eq!(healthy_assets.successes, 1);
        assert_eq!(healthy_assets.rejections, 0);
    }

    #[test]
    fn test_error_rate_needs_full_window() {
        let config = CircuitConfig { failure_threshold: 4, ..CircuitConfig::default() };
        let rate = config.error_rate();
        assert!(rate > 0.75);
        assert!(rate < 1.0);
    }
}
