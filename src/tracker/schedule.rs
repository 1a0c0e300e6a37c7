// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! When the next cycle of a data type runs.

use chrono::DateTime;
use tracing::warn;

use crate::config::HistorySyncConfig;
use crate::remote::CacheHint;
use crate::resilience::retry::RetryConfig;

use super::types::{SyncTracker, TrackerStatus};

/// Next-run rules for completed cycles.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    pub default_refresh_ms: i64,
    pub error_backoff: RetryConfig,
    pub conflict_backoff_ms: i64,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self::from_config(&HistorySyncConfig::default())
    }
}

impl SchedulePolicy {
    #[must_use]
    pub fn from_config(config: &HistorySyncConfig) -> Self {
        Self {
            default_refresh_ms: config.default_refresh_ms(),
            error_backoff: config.error_backoff(),
            conflict_backoff_ms: config.conflict_backoff_ms(),
        }
    }

    /// The cache hint when there is one (never in the past), else the
    /// default refresh interval.
    #[must_use]
    pub fn next_after_success(&self, now: i64, hint: Option<i64>) -> i64 {
        match hint {
            Some(expires) => expires.max(now),
            None => now.saturating_add(self.default_refresh_ms),
        }
    }

    /// `consecutive_failures` counts this failure too.
    #[must_use]
    pub fn next_after_error(&self, now: i64, consecutive_failures: u32) -> i64 {
        let delay = self.error_backoff.delay_for_attempt(consecutive_failures.max(1));
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        now.saturating_add(delay_ms)
    }

    #[must_use]
    pub fn next_after_conflict(&self, now: i64) -> i64 {
        now.saturating_add(self.conflict_backoff_ms)
    }
}

/// Errors at the head of `recent` (newest first), skipping the Pending tracker.
#[must_use]
pub fn trailing_errors(recent: &[SyncTracker]) -> u32 {
    recent
        .iter()
        .filter(|t| t.is_terminal())
        .take_while(|t| t.status == TrackerStatus::Error)
        .count() as u32
}

/// Epoch millis a hint points at, if it can be read.
#[must_use]
pub fn hint_millis(hint: &CacheHint) -> Option<i64> {
    match hint {
        CacheHint::None => None,
        CacheHint::ExpiresAt(ms) => Some(*ms),
        CacheHint::HttpDate(raw) => match DateTime::parse_from_rfc2822(raw.trim()) {
            Ok(date) => Some(date.timestamp_millis()),
            Err(e) => {
                warn!(header = %raw, error = %e, "Ignoring unparseable cache hint");
                None
            }
        },
    }
}

/// Latest validity time over all fetched pages.
pub fn latest_hint<'a>(hints: impl IntoIterator<Item = &'a CacheHint>) -> Option<i64> {
    hints.into_iter().filter_map(hint_millis).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::record::OwnerId;
    use std::time::Duration;

    fn policy() -> SchedulePolicy {
        SchedulePolicy {
            default_refresh_ms: 1_000,
            error_backoff: RetryConfig::backoff(Duration::from_millis(100), Duration::from_millis(1_000), 2.0),
            conflict_backoff_ms: 86_400_000,
        }
    }

    fn tracker(id: i64, status: TrackerStatus) -> SyncTracker {
        let mut t = SyncTracker::pending(id, OwnerId(1), DataType::Skills, 0);
        t.status = status;
        t
    }

    #[test]
    fn test_success_uses_hint_or_default() {
        let p = policy();
        assert_eq!(p.next_after_success(500, Some(5_000)), 5_000);
        assert_eq!(p.next_after_success(500, None), 1_500);
        // Stale hints never schedule into the past
        assert_eq!(p.next_after_success(500, Some(10)), 500);
    }

    #[test]
    fn test_error_backoff_grows_and_caps() {
        let p = policy();
        assert_eq!(p.next_after_error(0, 1), 100);
        assert_eq!(p.next_after_error(0, 2), 200);
        assert_eq!(p.next_after_error(0, 3), 400);
        assert_eq!(p.next_after_error(0, 10), 1_000);
        assert_eq!(p.next_after_error(0, 0), 100);
        assert_eq!(p.next_after_conflict(0), 86_400_000);
    }

    #[test]
    fn test_trailing_errors() {
        let recent = vec![
            tracker(5, TrackerStatus::Pending),
            tracker(4, TrackerStatus::Error),
            tracker(3, TrackerStatus::Error),
            tracker(2, TrackerStatus::Finished),
            tracker(1, TrackerStatus::Error),
        ];
        assert_eq!(trailing_errors(&recent), 2);
        assert_eq!(trailing_errors(&recent[3..]), 0);
        assert_eq!(trailing_errors(&[]), 0);
    }

    #[test]
    fn test_http_date_hint() {
        let hint = CacheHint::HttpDate("Wed, 21 Oct 2015 07:28:00 GMT".into());
        assert_eq!(hint_millis(&hint), Some(1_445_412_480_000));
        assert_eq!(hint_millis(&CacheHint::HttpDate("soon".into())), None);
    }

    #[test]
    fn test_latest_hint_over_pages() {
        let hints = [
            CacheHint::ExpiresAt(3_000),
            CacheHint::None,
            CacheHint::ExpiresAt(7_000),
        ];
        assert_eq!(latest_hint(&hints), Some(7_000));
        assert_eq!(latest_hint(&[CacheHint::None]), None);
    }
}
