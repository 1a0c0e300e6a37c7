// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::traits::{
    ApplyStats, ChangeSet, OwnerStateStore, StorageError, TrackerStore, VersionStore,
};
use super::versioning::{apply_edits, plan_mutation, MutationEffect};
use crate::data_type::DataType;
use crate::query::AttributeQuery;
use crate::record::{OwnerId, VersionedRecord};
use crate::tracker::{OwnerSyncState, SyncTracker, TrackerStatus};

/// Versions of every key of one (owner, data type).
#[derive(Default)]
struct Partition {
    keys: HashMap<String, Vec<VersionedRecord>>,
}

#[derive(Default)]
struct TrackerTable {
    next_id: i64,
    trackers: BTreeMap<i64, SyncTracker>,
    pending: HashMap<(OwnerId, DataType), i64>,
}

impl TrackerTable {
    fn insert_pending(&mut self, owner: OwnerId, data_type: DataType, scheduled_at: i64) -> SyncTracker {
        self.next_id += 1;
        let tracker = SyncTracker::pending(self.next_id, owner, data_type, scheduled_at);
        self.trackers.insert(tracker.id, tracker.clone());
        self.pending.insert((owner, data_type), tracker.id);
        tracker
    }

    fn pending_mut(&mut self, id: i64) -> Result<&mut SyncTracker, StorageError> {
        let tracker = self
            .trackers
            .get_mut(&id)
            .ok_or(StorageError::TrackerNotFound(id))?;
        if tracker.is_terminal() {
            return Err(StorageError::TrackerFinished(id));
        }
        Ok(tracker)
    }
}

/// Process-local store for tests, demos and single-process deployments.
///
/// Each (owner, data type) partition sits behind its own `RwLock`, so a
/// change set is published in one step and readers never see half of it.
/// Trackers live in a single table guarded by one mutex.
pub struct InMemoryStore {
    partitions: DashMap<(OwnerId, DataType), Arc<RwLock<Partition>>>,
    trackers: Mutex<TrackerTable>,
    owner_state: DashMap<OwnerId, OwnerSyncState>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
            trackers: Mutex::new(TrackerTable::default()),
            owner_state: DashMap::new(),
        }
    }

    /// Total number of stored versions across all partitions.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.value().read().keys.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    fn partition(&self, owner: OwnerId, data_type: DataType) -> Option<Arc<RwLock<Partition>>> {
        self.partitions.get(&(owner, data_type)).map(|p| p.value().clone())
    }

    fn partition_or_create(&self, owner: OwnerId, data_type: DataType) -> Arc<RwLock<Partition>> {
        self.partitions
            .entry((owner, data_type))
            .or_insert_with(|| Arc::new(RwLock::new(Partition::default())))
            .value()
            .clone()
    }

    fn collect(
        &self,
        owner: OwnerId,
        data_type: DataType,
        query: &AttributeQuery,
        keep: impl Fn(&VersionedRecord) -> bool,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        query.validate()?;
        let Some(partition) = self.partition(owner, data_type) else {
            return Ok(Vec::new());
        };
        let guard = partition.read();
        let mut out: Vec<VersionedRecord> = guard
            .keys
            .values()
            .flatten()
            .filter(|v| keep(v) && query.matches(&v.payload))
            .cloned()
            .collect();
        drop(guard);
        out.sort_by(|a, b| {
            (a.valid_from, a.ordinal, &a.natural_key).cmp(&(b.valid_from, b.ordinal, &b.natural_key))
        });
        Ok(out)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionStore for InMemoryStore {
    async fn get_live(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
        as_of: i64,
    ) -> Result<Option<VersionedRecord>, StorageError> {
        let Some(partition) = self.partition(owner, data_type) else {
            return Ok(None);
        };
        let guard = partition.read();
        Ok(guard
            .keys
            .get(natural_key)
            .and_then(|versions| versions.iter().find(|v| v.is_live_at(as_of)))
            .cloned())
    }

    async fn list_live(
        &self,
        owner: OwnerId,
        data_type: DataType,
        as_of: i64,
        query: &AttributeQuery,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        self.collect(owner, data_type, query, |v| v.is_live_at(as_of))
    }

    async fn list_range(
        &self,
        owner: OwnerId,
        data_type: DataType,
        from: i64,
        to: i64,
        query: &AttributeQuery,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        self.collect(owner, data_type, query, |v| v.overlaps(from, to))
    }

    async fn history(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        let Some(partition) = self.partition(owner, data_type) else {
            return Ok(Vec::new());
        };
        let guard = partition.read();
        Ok(guard.keys.get(natural_key).cloned().unwrap_or_default())
    }

    async fn apply(&self, change_set: &ChangeSet) -> Result<ApplyStats, StorageError> {
        let mut stats = ApplyStats::default();
        if change_set.is_empty() {
            return Ok(stats);
        }

        let partition = self.partition_or_create(change_set.owner, change_set.data_type);
        let mut guard = partition.write();

        // Validate everything against copies first; publish only if all pass.
        let mut scratch: HashMap<&str, Vec<VersionedRecord>> = HashMap::new();
        for mutation in &change_set.mutations {
            let key = mutation.natural_key();
            let versions = scratch
                .entry(key)
                .or_insert_with(|| guard.keys.get(key).cloned().unwrap_or_default());
            let (edits, effect) = plan_mutation(
                change_set.owner,
                change_set.data_type,
                change_set.at,
                versions,
                mutation,
            )?;
            apply_edits(versions, edits);
            match effect {
                MutationEffect::Inserted => stats.inserted += 1,
                MutationEffect::Evolved => stats.evolved += 1,
                MutationEffect::Replaced => stats.replaced += 1,
                MutationEffect::Unchanged => stats.unchanged += 1,
            }
        }

        for (key, versions) in scratch {
            if versions.is_empty() {
                guard.keys.remove(key);
            } else {
                guard.keys.insert(key.to_string(), versions);
            }
        }
        Ok(stats)
    }
}

impl InMemoryStore {
    fn record_expiry(&self, owner: OwnerId, data_type: DataType, expires_at: i64) {
        self.owner_state
            .entry(owner)
            .or_insert_with(|| OwnerSyncState::new(owner))
            .expiries
            .insert(data_type, expires_at);
    }
}

#[async_trait]
impl TrackerStore for InMemoryStore {
    async fn get_or_create_pending(
        &self,
        owner: OwnerId,
        data_type: DataType,
        scheduled_at: i64,
    ) -> Result<SyncTracker, StorageError> {
        let mut table = self.trackers.lock();
        if let Some(existing) = table
            .pending
            .get(&(owner, data_type))
            .and_then(|id| table.trackers.get(id))
        {
            return Ok(existing.clone());
        }
        Ok(table.insert_pending(owner, data_type, scheduled_at))
    }

    async fn pending(
        &self,
        owner: OwnerId,
        data_type: DataType,
    ) -> Result<Option<SyncTracker>, StorageError> {
        let table = self.trackers.lock();
        Ok(table
            .pending
            .get(&(owner, data_type))
            .and_then(|id| table.trackers.get(id))
            .cloned())
    }

    async fn mark_started(&self, id: i64, run_start: i64) -> Result<SyncTracker, StorageError> {
        let mut table = self.trackers.lock();
        let tracker = table.pending_mut(id)?;
        tracker.run_start = Some(run_start);
        Ok(tracker.clone())
    }

    async fn complete_cycle(
        &self,
        id: i64,
        status: TrackerStatus,
        detail: Option<String>,
        run_end: i64,
        next_scheduled_at: i64,
        expires_at: Option<i64>,
    ) -> Result<(SyncTracker, SyncTracker), StorageError> {
        if !status.is_terminal() {
            return Err(StorageError::InvalidTransition { id, status });
        }
        let mut table = self.trackers.lock();
        let tracker = table.pending_mut(id)?;
        tracker.status = status;
        tracker.detail = detail;
        tracker.run_end = Some(run_end);
        let completed = tracker.clone();

        // Still under the tracker lock: completion and expiry land together
        if let Some(expires_at) = expires_at {
            self.record_expiry(completed.owner, completed.data_type, expires_at);
        }
        table.pending.remove(&(completed.owner, completed.data_type));
        let next = table.insert_pending(completed.owner, completed.data_type, next_scheduled_at);
        Ok((completed, next))
    }

    async fn has_succeeded(&self, owner: OwnerId, data_type: DataType) -> Result<bool, StorageError> {
        let table = self.trackers.lock();
        Ok(table.trackers.values().any(|t| {
            t.owner == owner
                && t.data_type == data_type
                && matches!(t.status, TrackerStatus::Finished | TrackerStatus::Warning)
        }))
    }

    async fn latest_terminal(
        &self,
        owner: OwnerId,
        data_type: DataType,
    ) -> Result<Option<SyncTracker>, StorageError> {
        let table = self.trackers.lock();
        Ok(table
            .trackers
            .values()
            .rev()
            .find(|t| t.owner == owner && t.data_type == data_type && t.is_terminal())
            .cloned())
    }

    async fn recent_trackers(
        &self,
        owner: OwnerId,
        data_type: DataType,
        limit: usize,
    ) -> Result<Vec<SyncTracker>, StorageError> {
        let table = self.trackers.lock();
        Ok(table
            .trackers
            .values()
            .rev()
            .filter(|t| t.owner == owner && t.data_type == data_type)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<SyncTracker>, StorageError> {
        let table = self.trackers.lock();
        Ok(table
            .trackers
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OwnerStateStore for InMemoryStore {
    async fn owner_state(&self, owner: OwnerId) -> Result<OwnerSyncState, StorageError> {
        Ok(self
            .owner_state
            .get(&owner)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| OwnerSyncState::new(owner)))
    }

    async fn set_expiry(
        &self,
        owner: OwnerId,
        data_type: DataType,
        expires_at: i64,
    ) -> Result<(), StorageError> {
        self.record_expiry(owner, data_type, expires_at);
        Ok(())
    }
}
