// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::data_type::DataType;
use crate::query::{AttributeQuery, QueryError};
use crate::record::{OwnerId, VersionedRecord};
use crate::tracker::{OwnerSyncState, SyncTracker, TrackerStatus};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Version conflict for {owner}/{data_type}/'{natural_key}': {reason}")]
    Conflict {
        owner: OwnerId,
        data_type: DataType,
        natural_key: String,
        reason: String,
    },
    #[error("No open version for {owner}/{data_type}/'{natural_key}'")]
    NoOpenVersion {
        owner: OwnerId,
        data_type: DataType,
        natural_key: String,
    },
    #[error("Tracker {0} not found")]
    TrackerNotFound(i64),
    #[error("Tracker {0} has already reached a terminal status")]
    TrackerFinished(i64),
    #[error("Tracker {id} cannot transition to {status}")]
    InvalidTransition { id: i64, status: TrackerStatus },
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),
}

impl StorageError {
    /// True for errors caused by the data (the diff can't be applied), as
    /// opposed to the persistence layer being unavailable.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. } | StorageError::NoOpenVersion { .. })
    }
}

/// One step of a reconciliation diff.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Open a new version for a key with no live version
    Insert {
        natural_key: String,
        payload: Value,
        ordinal: i64,
    },
    /// Close the open version (soft-delete)
    Evolve { natural_key: String },
    /// Close the open version and open a new one, when the payload changed.
    /// `ordinal: None` keeps the previous version's position.
    Replace {
        natural_key: String,
        payload: Value,
        ordinal: Option<i64>,
    },
}

impl Mutation {
    #[must_use]
    pub fn natural_key(&self) -> &str {
        match self {
            Mutation::Insert { natural_key, .. }
            | Mutation::Evolve { natural_key }
            | Mutation::Replace { natural_key, .. } => natural_key,
        }
    }
}

/// Ordered mutations for one (owner, data type), all effective at `at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub owner: OwnerId,
    pub data_type: DataType,
    pub at: i64,
    pub mutations: Vec<Mutation>,
}

impl ChangeSet {
    #[must_use]
    pub fn new(owner: OwnerId, data_type: DataType, at: i64) -> Self {
        Self {
            owner,
            data_type,
            at,
            mutations: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }
}

/// What an applied change set did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub inserted: usize,
    pub evolved: usize,
    pub replaced: usize,
    /// `Replace` mutations whose payload turned out to be identical
    pub unchanged: usize,
}

impl ApplyStats {
    /// Versions written or closed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted + self.evolved + self.replaced
    }
}

/// Bitemporal versioned record store.
///
/// For a fixed (owner, data type, natural key) the stored intervals never
/// overlap and at most one of them is open.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// The version of one key live at `as_of`.
    async fn get_live(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
        as_of: i64,
    ) -> Result<Option<VersionedRecord>, StorageError>;

    /// Every version live at `as_of` matching `query`, ordered by
    /// (`valid_from`, `ordinal`, `natural_key`).
    async fn list_live(
        &self,
        owner: OwnerId,
        data_type: DataType,
        as_of: i64,
        query: &AttributeQuery,
    ) -> Result<Vec<VersionedRecord>, StorageError>;

    /// Every version whose interval intersects `[from, to)` and matches `query`.
    async fn list_range(
        &self,
        owner: OwnerId,
        data_type: DataType,
        from: i64,
        to: i64,
        query: &AttributeQuery,
    ) -> Result<Vec<VersionedRecord>, StorageError>;

    /// All versions of one key ordered by `valid_from`.
    async fn history(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
    ) -> Result<Vec<VersionedRecord>, StorageError>;

    /// Apply a change set as one all-or-nothing step.
    async fn apply(&self, change_set: &ChangeSet) -> Result<ApplyStats, StorageError>;

    /// Open a new version at `record.valid_from`.
    async fn insert(&self, record: &VersionedRecord) -> Result<(), StorageError> {
        let mut cs = ChangeSet::new(record.owner, record.data_type, record.valid_from);
        cs.mutations.push(Mutation::Insert {
            natural_key: record.natural_key.clone(),
            payload: record.payload.clone(),
            ordinal: record.ordinal,
        });
        self.apply(&cs).await.map(|_| ())
    }

    /// Close the open version of a key at `at`.
    async fn evolve(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
        at: i64,
    ) -> Result<(), StorageError> {
        let mut cs = ChangeSet::new(owner, data_type, at);
        cs.mutations.push(Mutation::Evolve {
            natural_key: natural_key.to_string(),
        });
        self.apply(&cs).await.map(|_| ())
    }

    /// Supersede the open version with `payload` unless it is unchanged.
    /// Returns whether a new version was written.
    async fn replace(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
        at: i64,
        payload: Value,
    ) -> Result<bool, StorageError> {
        let mut cs = ChangeSet::new(owner, data_type, at);
        cs.mutations.push(Mutation::Replace {
            natural_key: natural_key.to_string(),
            payload,
            ordinal: None,
        });
        Ok(self.apply(&cs).await?.replaced == 1)
    }
}

/// Persistence for sync trackers.
///
/// At most one Pending tracker exists per (owner, data type).
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Return the Pending tracker, creating one scheduled at `scheduled_at`
    /// if none exists. Atomic under concurrent callers.
    async fn get_or_create_pending(
        &self,
        owner: OwnerId,
        data_type: DataType,
        scheduled_at: i64,
    ) -> Result<SyncTracker, StorageError>;

    async fn pending(
        &self,
        owner: OwnerId,
        data_type: DataType,
    ) -> Result<Option<SyncTracker>, StorageError>;

    /// Record the start of a run on a Pending tracker.
    async fn mark_started(&self, id: i64, run_start: i64) -> Result<SyncTracker, StorageError>;

    /// Move a Pending tracker to `status` and create the next Pending tracker
    /// in the same atomic step. Returns (completed, next).
    ///
    /// `expires_at`, when given, becomes the owner's expiry for the data type
    /// in that same step; nothing is written if the completion fails.
    async fn complete_cycle(
        &self,
        id: i64,
        status: TrackerStatus,
        detail: Option<String>,
        run_end: i64,
        next_scheduled_at: i64,
        expires_at: Option<i64>,
    ) -> Result<(SyncTracker, SyncTracker), StorageError>;

    /// Most recent tracker in a terminal status.
    async fn latest_terminal(
        &self,
        owner: OwnerId,
        data_type: DataType,
    ) -> Result<Option<SyncTracker>, StorageError>;

    /// Whether any tracker ever ended Finished or Warning.
    async fn has_succeeded(&self, owner: OwnerId, data_type: DataType) -> Result<bool, StorageError>;

    /// Most recent trackers first, at most `limit`.
    async fn recent_trackers(
        &self,
        owner: OwnerId,
        data_type: DataType,
        limit: usize,
    ) -> Result<Vec<SyncTracker>, StorageError>;

    /// Every tracker of an owner, oldest first.
    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<SyncTracker>, StorageError>;
}

/// Per-owner "fresh until" times.
#[async_trait]
pub trait OwnerStateStore: Send + Sync {
    async fn owner_state(&self, owner: OwnerId) -> Result<OwnerSyncState, StorageError>;

    async fn set_expiry(
        &self,
        owner: OwnerId,
        data_type: DataType,
        expires_at: i64,
    ) -> Result<(), StorageError>;
}

/// Everything the orchestrator persists.
pub trait HistoryStore: VersionStore + TrackerStore + OwnerStateStore {}

impl<T: VersionStore + TrackerStore + OwnerStateStore> HistoryStore for T {}
