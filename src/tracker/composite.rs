// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::data_type::DataType;
use crate::record::OwnerId;

use super::types::{SyncTracker, TrackerStatus};

/// Read-side aggregate of one owner's per-endpoint trackers for a cycle
/// window starting at `since`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositeView {
    pub owner: OwnerId,
    pub since: i64,
    /// Terminal status reached at or after `since`, else Pending
    pub entries: BTreeMap<DataType, TrackerStatus>,
}

impl CompositeView {
    /// Build the view for `data_types` from any set of the owner's trackers.
    pub fn from_trackers(
        owner: OwnerId,
        data_types: impl IntoIterator<Item = DataType>,
        since: i64,
        trackers: &[SyncTracker],
    ) -> Self {
        let mut entries: BTreeMap<DataType, TrackerStatus> = data_types
            .into_iter()
            .map(|dt| (dt, TrackerStatus::Pending))
            .collect();
        let mut latest: BTreeMap<DataType, i64> = BTreeMap::new();

        for tracker in trackers {
            if tracker.owner != owner || !tracker.is_terminal() {
                continue;
            }
            if !tracker.run_end.is_some_and(|end| end >= since) {
                continue;
            }
            let Some(entry) = entries.get_mut(&tracker.data_type) else {
                continue;
            };
            let newest = latest.entry(tracker.data_type).or_insert(i64::MIN);
            if tracker.id > *newest {
                *newest = tracker.id;
                *entry = tracker.status;
            }
        }

        Self { owner, since, entries }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.entries.values().all(TrackerStatus::is_terminal)
    }

    /// Pending until every entry is terminal; then Error beats Warning beats Finished.
    #[must_use]
    pub fn status(&self) -> TrackerStatus {
        if !self.is_finished() {
            return TrackerStatus::Pending;
        }
        let has = |s: TrackerStatus| self.entries.values().any(|&e| e == s);
        if has(TrackerStatus::Error) {
            TrackerStatus::Error
        } else if has(TrackerStatus::Warning) {
            TrackerStatus::Warning
        } else {
            TrackerStatus::Finished
        }
    }

    /// Data types still waiting for a terminal status in this window.
    pub fn pending(&self) -> impl Iterator<Item = DataType> + '_ {
        self.entries
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(dt, _)| *dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DataType::*;

    fn done(id: i64, dt: DataType, status: TrackerStatus, run_end: i64) -> SyncTracker {
        let mut t = SyncTracker::pending(id, OwnerId(1), dt, 0);
        t.status = status;
        t.run_end = Some(run_end);
        t
    }

    #[test]
    fn test_pending_until_every_type_completes() {
        let trackers = vec![done(1, Skills, TrackerStatus::Finished, 100)];
        let view = CompositeView::from_trackers(OwnerId(1), [Skills, Assets], 50, &trackers);

        assert!(!view.is_finished());
        assert_eq!(view.status(), TrackerStatus::Pending);
        assert_eq!(view.pending().collect::<Vec<_>>(), vec![Assets]);
    }

    #[test]
    fn test_status_priority() {
        let trackers = vec![
            done(1, Skills, TrackerStatus::Finished, 100),
            done(2, Assets, TrackerStatus::Warning, 100),
            done(3, Contacts, TrackerStatus::Finished, 100),
        ];
        let view = CompositeView::from_trackers(OwnerId(1), [Skills, Assets, Contacts], 50, &trackers);
        assert_eq!(view.status(), TrackerStatus::Warning);

        let mut with_error = trackers.clone();
        with_error.push(done(4, Contacts, TrackerStatus::Error, 120));
        let view = CompositeView::from_trackers(OwnerId(1), [Skills, Assets, Contacts], 50, &with_error);
        assert_eq!(view.status(), TrackerStatus::Error);
    }

    #[test]
    fn test_ignores_trackers_before_window_and_other_owners() {
        let mut other_owner = done(3, Assets, TrackerStatus::Finished, 100);
        other_owner.owner = OwnerId(2);
        let trackers = vec![done(1, Skills, TrackerStatus::Finished, 10), other_owner];

        let view = CompositeView::from_trackers(OwnerId(1), [Skills, Assets], 50, &trackers);
        assert_eq!(view.entries[&Skills], TrackerStatus::Pending);
        assert_eq!(view.entries[&Assets], TrackerStatus::Pending);
    }

    #[test]
    fn test_empty_view_is_finished() {
        let view = CompositeView::from_trackers(OwnerId(1), [], 0, &[]);
        assert!(view.is_finished());
        assert_eq!(view.status(), TrackerStatus::Finished);
    }
}
