// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync orchestrator.

use thiserror::Error;

use crate::data_type::DataType;
use crate::reconcile::ReconcileError;
use crate::record::OwnerId;
use crate::remote::RemoteError;
use crate::storage::{ApplyStats, StorageError};
use crate::tracker::{DependencyError, TrackerStatus};

/// Why a cycle ended in Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A prerequisite's latest cycle didn't finish; nothing was fetched
    Prerequisite,
    /// Transport, status, timeout or open circuit
    Remote,
    /// The remote answered with something unusable
    Malformed,
    /// The diff couldn't be applied to stored history
    Conflict,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prerequisite => "prerequisite",
            Self::Remote => "remote",
            Self::Malformed => "malformed",
            Self::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub owner: OwnerId,
    pub data_type: DataType,
    /// The tracker this cycle completed
    pub tracker_id: i64,
    pub status: TrackerStatus,
    /// Set when `status` is Error
    pub failure: Option<FailureKind>,
    pub detail: Option<String>,
    /// Remote calls made
    pub pages: usize,
    /// Distinct records in the snapshot
    pub records: usize,
    pub duplicates: usize,
    pub stats: ApplyStats,
    pub next_scheduled_at: i64,
}

impl SyncReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, TrackerStatus::Finished | TrackerStatus::Warning)
    }
}

/// Result of [`super::SyncOrchestrator::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The Pending tracker isn't due yet; nothing was fetched or written
    NotDue {
        owner: OwnerId,
        data_type: DataType,
        tracker_id: i64,
        scheduled_at: i64,
    },
    Completed(SyncReport),
}

impl SyncOutcome {
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::NotDue { data_type, .. } => *data_type,
            Self::Completed(report) => report.data_type,
        }
    }

    #[must_use]
    pub fn is_not_due(&self) -> bool {
        matches!(self, Self::NotDue { .. })
    }

    #[must_use]
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::NotDue { .. } => None,
        }
    }
}

/// Failures that stop a batch of cycles rather than being recorded on a tracker.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error("sync task failed: {0}")]
    Task(String),
}

/// Why one cycle failed (internal).
#[derive(Error, Debug)]
pub(super) enum CycleError {
    #[error("unmet prerequisites: {}", list(.0))]
    Prerequisite(Vec<DataType>),
    #[error(transparent)]
    Remote(RemoteError),
    #[error("malformed remote data: {0}")]
    Malformed(String),
    #[error(transparent)]
    Conflict(StorageError),
    /// Persistence is unavailable; never recorded on the tracker
    #[error(transparent)]
    Backend(StorageError),
}

fn list(types: &[DataType]) -> String {
    types.iter().map(DataType::as_str).collect::<Vec<_>>().join(", ")
}

impl CycleError {
    pub(super) fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Prerequisite(_) => Some(FailureKind::Prerequisite),
            Self::Remote(_) => Some(FailureKind::Remote),
            Self::Malformed(_) => Some(FailureKind::Malformed),
            Self::Conflict(_) => Some(FailureKind::Conflict),
            Self::Backend(_) => None,
        }
    }
}

impl From<RemoteError> for CycleError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Malformed(msg) => Self::Malformed(msg),
            other => Self::Remote(other),
        }
    }
}

impl From<StorageError> for CycleError {
    fn from(err: StorageError) -> Self {
        if err.is_conflict() {
            Self::Conflict(err)
        } else {
            Self::Backend(err)
        }
    }
}

impl From<ReconcileError> for CycleError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::MissingKeyField(e) => Self::Malformed(e.to_string()),
            ReconcileError::Storage(e) => e.into(),
        }
    }
}
