// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One (owner, data type) sync cycle.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::data_type::{DataType, DataTypeDescriptor};
use crate::metrics;
use crate::reconcile::{reconcile, RemoteSnapshot};
use crate::record::OwnerId;
use crate::storage::{ApplyStats, StorageError};
use crate::tracker::schedule::{latest_hint, trailing_errors};
use crate::tracker::{SyncTracker, TrackerStatus};

use super::types::{CycleError, FailureKind, SyncOutcome, SyncReport};
use super::SyncOrchestrator;

/// Trackers inspected when counting consecutive failures
const BACKOFF_LOOKBACK: usize = 32;

/// What a successful cycle produced.
struct CycleSummary {
    pages: usize,
    records: usize,
    duplicates: usize,
    stats: ApplyStats,
    hint: Option<i64>,
}

impl CycleSummary {
    fn detail(&self) -> String {
        let mut detail = format!(
            "{} records over {} pages: {} inserted, {} evolved, {} replaced, {} unchanged",
            self.records,
            self.pages,
            self.stats.inserted,
            self.stats.evolved,
            self.stats.replaced,
            self.stats.unchanged
        );
        if self.duplicates > 0 {
            detail.push_str(&format!("; dropped {} duplicate keys", self.duplicates));
        }
        detail
    }
}

/// Decrements the active-cycle gauge when a cycle ends, however it ends.
struct ActiveGuard<'a>(&'a SyncOrchestrator);

impl<'a> ActiveGuard<'a> {
    fn enter(orchestrator: &'a SyncOrchestrator) -> Self {
        let now = orchestrator.active.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_active_syncs(now);
        Self(orchestrator)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let now = self.0.active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::set_active_syncs(now);
    }
}

impl SyncOrchestrator {
    /// Run one cycle of `data_type` for `owner` if it is due at `now`.
    ///
    /// Remote, malformed, prerequisite and conflict failures are recorded on
    /// the tracker and reported as a completed cycle with status Error. Only
    /// an unavailable store is returned as `Err`.
    #[tracing::instrument(skip_all, fields(owner = %owner, data_type = %data_type, now = now))]
    pub async fn sync(
        &self,
        owner: OwnerId,
        data_type: DataType,
        now: i64,
    ) -> Result<SyncOutcome, StorageError> {
        let tracker = self.store.get_or_create_pending(owner, data_type, now).await?;
        if !tracker.is_due(now) {
            debug!(tracker_id = tracker.id, scheduled_at = tracker.scheduled_at, "Not due, skipping");
            metrics::record_cycle_skipped(data_type.as_str());
            return Ok(SyncOutcome::NotDue {
                owner,
                data_type,
                tracker_id: tracker.id,
                scheduled_at: tracker.scheduled_at,
            });
        }

        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| StorageError::Backend(format!("worker pool closed: {}", e)))?;
        let _active = ActiveGuard::enter(self);
        let started = Instant::now();

        let tracker = self.store.mark_started(tracker.id, now).await?;
        let descriptor = data_type.descriptor();
        let result = self.run_cycle(owner, &descriptor, now).await;

        let report = match result {
            Ok(summary) => self.complete_success(&tracker, summary, now).await?,
            Err(CycleError::Backend(e)) => {
                warn!(tracker_id = tracker.id, error = %e, "Store unavailable, cycle left pending");
                return Err(e);
            }
            Err(e) => self.complete_failure(&tracker, e, now).await?,
        };

        metrics::record_cycle(data_type.as_str(), report.status.as_str());
        metrics::record_cycle_duration(data_type.as_str(), started.elapsed());
        Ok(SyncOutcome::Completed(report))
    }

    async fn run_cycle(
        &self,
        owner: OwnerId,
        descriptor: &DataTypeDescriptor,
        now: i64,
    ) -> Result<CycleSummary, CycleError> {
        let unmet = self.unmet_prerequisites(owner, descriptor).await?;
        if !unmet.is_empty() {
            return Err(CycleError::Prerequisite(unmet));
        }

        let fetched = self.fetch_snapshot(owner, descriptor).await?;
        let hint = latest_hint(&fetched.hints);
        let snapshot = RemoteSnapshot::from_records(descriptor, fetched.records)?;
        let stats = reconcile(self.store.as_ref(), descriptor, owner, now, &snapshot).await?;

        Ok(CycleSummary {
            pages: fetched.pages,
            records: snapshot.len(),
            duplicates: snapshot.duplicates,
            stats,
            hint,
        })
    }

    /// Prerequisites that have never completed a cycle for this owner.
    ///
    /// Finished and Warning both count, and a later failure doesn't revoke
    /// the data already stored.
    async fn unmet_prerequisites(
        &self,
        owner: OwnerId,
        descriptor: &DataTypeDescriptor,
    ) -> Result<Vec<DataType>, StorageError> {
        let mut unmet = Vec::new();
        for &prerequisite in descriptor.prerequisites {
            if !self.store.has_succeeded(owner, prerequisite).await? {
                unmet.push(prerequisite);
            }
        }
        Ok(unmet)
    }

    async fn complete_success(
        &self,
        tracker: &SyncTracker,
        summary: CycleSummary,
        now: i64,
    ) -> Result<SyncReport, StorageError> {
        let data_type = tracker.data_type;
        let status = if summary.duplicates > 0 {
            TrackerStatus::Warning
        } else {
            TrackerStatus::Finished
        };
        let next = self.schedule.next_after_success(now, summary.hint);
        let detail = summary.detail();

        let (completed, pending) = self
            .store
            .complete_cycle(tracker.id, status, Some(detail.clone()), now, next, Some(next))
            .await?;

        metrics::record_mutations(data_type.as_str(), &summary.stats);
        if summary.duplicates > 0 {
            metrics::record_duplicate_keys(data_type.as_str(), summary.duplicates);
            warn!(
                tracker_id = completed.id,
                duplicates = summary.duplicates,
                "Snapshot contained duplicate keys"
            );
        }
        info!(
            tracker_id = completed.id,
            status = %status,
            inserted = summary.stats.inserted,
            evolved = summary.stats.evolved,
            replaced = summary.stats.replaced,
            next_scheduled_at = pending.scheduled_at,
            "Sync cycle complete"
        );

        Ok(SyncReport {
            owner: tracker.owner,
            data_type,
            tracker_id: completed.id,
            status,
            failure: None,
            detail: Some(detail),
            pages: summary.pages,
            records: summary.records,
            duplicates: summary.duplicates,
            stats: summary.stats,
            next_scheduled_at: pending.scheduled_at,
        })
    }

    async fn complete_failure(
        &self,
        tracker: &SyncTracker,
        err: CycleError,
        now: i64,
    ) -> Result<SyncReport, StorageError> {
        let data_type = tracker.data_type;
        let kind = err.kind().unwrap_or(FailureKind::Remote);
        let detail = err.to_string();

        let next = if kind == FailureKind::Conflict {
            error!(
                owner = %tracker.owner,
                data_type = %data_type,
                tracker_id = tracker.id,
                error = %detail,
                "Reconciliation conflict, stored history left untouched"
            );
            self.schedule.next_after_conflict(now)
        } else {
            let recent = self
                .store
                .recent_trackers(tracker.owner, data_type, BACKOFF_LOOKBACK)
                .await?;
            let failures = trailing_errors(&recent) + 1;
            warn!(
                tracker_id = tracker.id,
                kind = %kind,
                consecutive_failures = failures,
                error = %detail,
                "Sync cycle failed"
            );
            self.schedule.next_after_error(now, failures)
        };

        let (completed, pending) = self
            .store
            .complete_cycle(
                tracker.id,
                TrackerStatus::Error,
                Some(detail.clone()),
                now,
                next,
                None,
            )
            .await?;
        metrics::record_cycle_failure(data_type.as_str(), kind.as_str());

        Ok(SyncReport {
            owner: tracker.owner,
            data_type,
            tracker_id: completed.id,
            status: TrackerStatus::Error,
            failure: Some(kind),
            detail: Some(detail),
            pages: 0,
            records: 0,
            duplicates: 0,
            stats: ApplyStats::default(),
            next_scheduled_at: pending.scheduled_at,
        })
    }
}
