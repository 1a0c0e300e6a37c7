// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data_type::DataType;
use crate::record::OwnerId;

/// Lifecycle of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    /// Scheduled, not yet completed
    Pending,
    Finished,
    /// Completed, but something about the snapshot was off
    Warning,
    Error,
}

impl TrackerStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrackerStatus::Pending)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerStatus::Pending => "pending",
            TrackerStatus::Finished => "finished",
            TrackerStatus::Warning => "warning",
            TrackerStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TrackerStatus::Pending),
            "finished" => Ok(TrackerStatus::Finished),
            "warning" => Ok(TrackerStatus::Warning),
            "error" => Ok(TrackerStatus::Error),
            other => Err(format!("unknown tracker status '{}'", other)),
        }
    }
}

/// Schedule and outcome of one (owner, data type) sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTracker {
    /// Monotonically increasing cycle id
    pub id: i64,
    pub owner: OwnerId,
    pub data_type: DataType,
    pub scheduled_at: i64,
    pub run_start: Option<i64>,
    pub run_end: Option<i64>,
    pub status: TrackerStatus,
    pub detail: Option<String>,
}

impl SyncTracker {
    /// A fresh Pending tracker.
    #[must_use]
    pub fn pending(id: i64, owner: OwnerId, data_type: DataType, scheduled_at: i64) -> Self {
        Self {
            id,
            owner,
            data_type,
            scheduled_at,
            run_start: None,
            run_end: None,
            status: TrackerStatus::Pending,
            detail: None,
        }
    }

    /// Pending and scheduled at or before `now`.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.status == TrackerStatus::Pending && self.scheduled_at <= now
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Per-owner "fresh until" times, one per data type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSyncState {
    pub owner: OwnerId,
    pub expiries: BTreeMap<DataType, i64>,
}

impl OwnerSyncState {
    #[must_use]
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            expiries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn expiry(&self, data_type: DataType) -> Option<i64> {
        self.expiries.get(&data_type).copied()
    }

    /// Whether the last successful sync of `data_type` is still valid at `now`.
    #[must_use]
    pub fn is_fresh(&self, data_type: DataType, now: i64) -> bool {
        self.expiry(data_type).is_some_and(|exp| now < exp)
    }
}
