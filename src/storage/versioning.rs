// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Interval rules shared by every backend.
//!
//! A backend loads the versions of one key, asks [`plan_mutation`] what to
//! do, and executes the returned edits in whatever way suits it (in-place on
//! a scratch copy, or as SQL statements inside a transaction).

use crate::data_type::DataType;
use crate::record::{payload_hash, OwnerId, VersionedRecord};

use super::traits::{Mutation, StorageError};

/// A primitive change to the versions of one key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum VersionEdit {
    /// Set `valid_to = at` on the version starting at `valid_from`
    Close { valid_from: i64, at: i64 },
    /// Drop the version starting at `valid_from` (closed before it was ever visible)
    Remove { valid_from: i64 },
    /// Store a new open version
    Add(VersionedRecord),
}

/// How a mutation counts in [`ApplyStats`](super::ApplyStats).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationEffect {
    Inserted,
    Evolved,
    Replaced,
    Unchanged,
}

/// Decide the edits for one mutation against the current versions of its key.
pub(crate) fn plan_mutation(
    owner: OwnerId,
    data_type: DataType,
    at: i64,
    versions: &[VersionedRecord],
    mutation: &Mutation,
) -> Result<(Vec<VersionEdit>, MutationEffect), StorageError> {
    let natural_key = mutation.natural_key();
    let conflict = |reason: String| StorageError::Conflict {
        owner,
        data_type,
        natural_key: natural_key.to_string(),
        reason,
    };
    let open = versions.iter().find(|v| v.is_open());

    match mutation {
        Mutation::Insert {
            payload, ordinal, ..
        } => {
            if let Some(open) = open {
                return Err(conflict(format!(
                    "insert at {} while a version is open since {}",
                    at, open.valid_from
                )));
            }
            if let Some(later) = versions.iter().find(|v| v.valid_to > at) {
                return Err(conflict(format!(
                    "insert at {} overlaps version [{}, {})",
                    at, later.valid_from, later.valid_to
                )));
            }
            let record = VersionedRecord::new(owner, data_type, natural_key.to_string(), at, payload.clone())
                .with_ordinal(*ordinal);
            Ok((vec![VersionEdit::Add(record)], MutationEffect::Inserted))
        }
        Mutation::Evolve { .. } => {
            let open = open.ok_or_else(|| StorageError::NoOpenVersion {
                owner,
                data_type,
                natural_key: natural_key.to_string(),
            })?;
            Ok((vec![close_at(open, at, &conflict)?], MutationEffect::Evolved))
        }
        Mutation::Replace {
            payload, ordinal, ..
        } => {
            let open = open.ok_or_else(|| StorageError::NoOpenVersion {
                owner,
                data_type,
                natural_key: natural_key.to_string(),
            })?;
            if payload_hash(payload) == open.payload_hash {
                return Ok((Vec::new(), MutationEffect::Unchanged));
            }
            let close = close_at(open, at, &conflict)?;
            let record = VersionedRecord::new(owner, data_type, natural_key.to_string(), at, payload.clone())
                .with_ordinal(ordinal.unwrap_or(open.ordinal));
            Ok((vec![close, VersionEdit::Add(record)], MutationEffect::Replaced))
        }
    }
}

fn close_at(
    open: &VersionedRecord,
    at: i64,
    conflict: &impl Fn(String) -> StorageError,
) -> Result<VersionEdit, StorageError> {
    if at < open.valid_from {
        return Err(conflict(format!(
            "cannot close at {} a version starting at {}",
            at, open.valid_from
        )));
    }
    if at == open.valid_from {
        Ok(VersionEdit::Remove {
            valid_from: open.valid_from,
        })
    } else {
        Ok(VersionEdit::Close {
            valid_from: open.valid_from,
            at,
        })
    }
}

/// Apply edits to an in-memory version list, keeping it ordered by `valid_from`.
pub(crate) fn apply_edits(versions: &mut Vec<VersionedRecord>, edits: Vec<VersionEdit>) {
    for edit in edits {
        match edit {
            VersionEdit::Close { valid_from, at } => {
                if let Some(v) = versions.iter_mut().find(|v| v.valid_from == valid_from) {
                    v.valid_to = at;
                }
            }
            VersionEdit::Remove { valid_from } => versions.retain(|v| v.valid_from != valid_from),
            VersionEdit::Add(record) => {
                let pos = versions.partition_point(|v| v.valid_from < record.valid_from);
                versions.insert(pos, record);
            }
        }
    }
}
