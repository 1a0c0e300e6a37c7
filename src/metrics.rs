// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for history-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `history_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `data_type`: snake_case data type name
//! - `status`: finished, warning, error
//! - `kind`: inserted, evolved, replaced / failure kind
//! - `outcome`: success, failure, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::storage::ApplyStats;

/// Record a completed sync cycle
pub fn record_cycle(data_type: &str, status: &str) {
    counter!(
        "history_sync_cycles_total",
        "data_type" => data_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a cycle skipped because it wasn't due
pub fn record_cycle_skipped(data_type: &str) {
    counter!(
        "history_sync_cycles_skipped_total",
        "data_type" => data_type.to_string()
    )
    .increment(1);
}

/// Record why a cycle failed
pub fn record_cycle_failure(data_type: &str, kind: &str) {
    counter!(
        "history_sync_cycle_failures_total",
        "data_type" => data_type.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record wall time of a whole cycle
pub fn record_cycle_duration(data_type: &str, duration: Duration) {
    histogram!(
        "history_sync_cycle_seconds",
        "data_type" => data_type.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record pages fetched for one snapshot
pub fn record_pages_fetched(data_type: &str, pages: usize) {
    counter!(
        "history_sync_pages_fetched_total",
        "data_type" => data_type.to_string()
    )
    .increment(pages as u64);
}

/// Record the size of an assembled snapshot
pub fn record_snapshot_size(data_type: &str, records: usize) {
    histogram!(
        "history_sync_snapshot_records",
        "data_type" => data_type.to_string()
    )
    .record(records as f64);
}

/// Record duplicate natural keys dropped from a snapshot
pub fn record_duplicate_keys(data_type: &str, count: usize) {
    counter!(
        "history_sync_duplicate_keys_total",
        "data_type" => data_type.to_string()
    )
    .increment(count as u64);
}

/// Record the mutations a change set applied
pub fn record_mutations(data_type: &str, stats: &ApplyStats) {
    for (kind, count) in [
        ("inserted", stats.inserted),
        ("evolved", stats.evolved),
        ("replaced", stats.replaced),
    ] {
        if count > 0 {
            counter!(
                "history_sync_mutations_total",
                "data_type" => data_type.to_string(),
                "kind" => kind
            )
            .increment(count as u64);
        }
    }
}

/// Record a remote call latency
pub fn record_remote_latency(data_type: &str, duration: Duration) {
    histogram!(
        "history_sync_remote_seconds",
        "data_type" => data_type.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a remote call that hit the fetch timeout
pub fn record_remote_timeout(data_type: &str) {
    counter!(
        "history_sync_remote_timeouts_total",
        "data_type" => data_type.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "history_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set the number of cycles currently holding a worker permit
pub fn set_active_syncs(count: usize) {
    gauge!("history_sync_active_syncs").set(count as f64);
}

/// A timing guard that records remote latency on drop
pub struct LatencyTimer {
    data_type: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(data_type: &'static str) -> Self {
        Self {
            data_type,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_remote_latency(self.data_type, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests verify the API doesn't panic without a recorder
    // installed. Exporters are the embedder's concern.

    #[test]
    fn test_cycle_metrics() {
        record_cycle("contacts", "finished");
        record_cycle("contacts", "error");
        record_cycle_skipped("skills");
        record_cycle_failure("assets", "remote");
        record_cycle_duration("assets", Duration::from_millis(12));
    }

    #[test]
    fn test_snapshot_metrics() {
        record_pages_fetched("assets", 3);
        record_snapshot_size("assets", 100);
        record_duplicate_keys("contacts", 2);
    }

    #[test]
    fn test_mutation_metrics() {
        let stats = ApplyStats {
            inserted: 3,
            evolved: 1,
            replaced: 0,
            unchanged: 5,
        };
        record_mutations("contacts", &stats);
    }

    #[test]
    fn test_remote_metrics() {
        record_remote_latency("wallet_journal", Duration::from_millis(40));
        record_remote_timeout("wallet_journal");
        record_circuit_breaker_call("remote_assets", "rejected");
        set_active_syncs(4);
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("skills");
            std::thread::sleep(Duration::from_micros(10));
        }
        // Timer recorded on drop
    }
}
