// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Diff-and-evolve reconciliation.
//!
//! A fetched snapshot is compared against the versions live at the fetch
//! time and turned into one [`ChangeSet`]:
//!
//! | key is...          | Full-Sync-Replace        | Append-Only |
//! |--------------------|--------------------------|-------------|
//! | only remote        | `Insert`                 | `Insert`    |
//! | both, same hash    | nothing                  | nothing     |
//! | both, hash differs | `Replace`                | nothing     |
//! | only stored        | `Evolve` (soft-delete)   | nothing     |
//!
//! # Example
//!
//! ```
//! use history_sync::reconcile::{plan, RemoteSnapshot};
//! use history_sync::{DataType, OwnerId};
//! use serde_json::json;
//!
//! let descriptor = DataType::Contacts.descriptor();
//! let snapshot = RemoteSnapshot::from_records(
//!     &descriptor,
//!     vec![json!({"contact_id": 1, "standing": 5.0})],
//! ).unwrap();
//!
//! let change_set = plan(&descriptor, OwnerId(1), 1_000, &snapshot, &[]);
//! assert_eq!(change_set.len(), 1);
//! ```

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::data_type::{DataTypeDescriptor, KeyError, ReconcilePolicy};
use crate::query::AttributeQuery;
use crate::record::{normalize_payload, payload_hash, OwnerId, VersionedRecord};
use crate::storage::{ApplyStats, ChangeSet, Mutation, StorageError, VersionStore};

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// A remote record can't be keyed: the payload is malformed
    #[error("malformed remote record: {0}")]
    MissingKeyField(#[from] KeyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One normalized, keyed remote record.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub natural_key: String,
    pub payload: Value,
    pub payload_hash: String,
    /// Position in the remote listing
    pub ordinal: i64,
}

/// A complete remote listing, ready to diff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    pub records: Vec<SnapshotRecord>,
    /// Records dropped because an earlier record had the same key
    pub duplicates: usize,
}

impl RemoteSnapshot {
    /// Normalize and key `records`, keeping the first record of each key.
    pub fn from_records(
        descriptor: &DataTypeDescriptor,
        records: Vec<Value>,
    ) -> Result<Self, ReconcileError> {
        let mut seen = HashSet::with_capacity(records.len());
        let mut snapshot = RemoteSnapshot::default();

        for raw in records {
            let payload = normalize_payload(raw, descriptor.float_decimals);
            let natural_key = descriptor.natural_key(&payload)?;
            if !seen.insert(natural_key.clone()) {
                snapshot.duplicates += 1;
                continue;
            }
            snapshot.records.push(SnapshotRecord {
                payload_hash: payload_hash(&payload),
                ordinal: snapshot.records.len() as i64,
                natural_key,
                payload,
            });
        }

        if snapshot.duplicates > 0 {
            debug!(
                data_type = %descriptor.data_type,
                duplicates = snapshot.duplicates,
                "Dropped duplicate keys from snapshot"
            );
        }
        Ok(snapshot)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Diff `snapshot` against the versions live at `at`.
///
/// Evolves come first, then inserts and replaces in snapshot order.
#[must_use]
pub fn plan(
    descriptor: &DataTypeDescriptor,
    owner: OwnerId,
    at: i64,
    snapshot: &RemoteSnapshot,
    live: &[VersionedRecord],
) -> ChangeSet {
    let mut change_set = ChangeSet::new(owner, descriptor.data_type, at);
    let stored: HashMap<&str, &VersionedRecord> =
        live.iter().map(|v| (v.natural_key.as_str(), v)).collect();

    if descriptor.policy == ReconcilePolicy::FullSyncReplace {
        let remote: HashSet<&str> = snapshot
            .records
            .iter()
            .map(|r| r.natural_key.as_str())
            .collect();
        // Stable order so the change set is deterministic
        let mut gone: Vec<&str> = stored
            .keys()
            .copied()
            .filter(|key| !remote.contains(key))
            .collect();
        gone.sort_unstable();
        change_set
            .mutations
            .extend(gone.into_iter().map(|key| Mutation::Evolve {
                natural_key: key.to_string(),
            }));
    }

    for record in &snapshot.records {
        match stored.get(record.natural_key.as_str()) {
            None => change_set.mutations.push(Mutation::Insert {
                natural_key: record.natural_key.clone(),
                payload: record.payload.clone(),
                ordinal: record.ordinal,
            }),
            Some(existing) => {
                if descriptor.policy == ReconcilePolicy::FullSyncReplace
                    && existing.payload_hash != record.payload_hash
                {
                    change_set.mutations.push(Mutation::Replace {
                        natural_key: record.natural_key.clone(),
                        payload: record.payload.clone(),
                        ordinal: Some(record.ordinal),
                    });
                }
            }
        }
    }

    change_set
}

/// Reconcile `snapshot` into `store` at time `at` as one atomic step.
pub async fn reconcile<S>(
    store: &S,
    descriptor: &DataTypeDescriptor,
    owner: OwnerId,
    at: i64,
    snapshot: &RemoteSnapshot,
) -> Result<ApplyStats, ReconcileError>
where
    S: VersionStore + ?Sized,
{
    let live = store
        .list_live(owner, descriptor.data_type, at, &AttributeQuery::all())
        .await?;
    let change_set = plan(descriptor, owner, at, snapshot, &live);
    if change_set.is_empty() {
        return Ok(ApplyStats::default());
    }
    Ok(store.apply(&change_set).await?)
}
