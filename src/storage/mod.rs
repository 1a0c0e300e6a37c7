// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistence: versioned records, sync trackers and owner sync state.
//!
//! - [`InMemoryStore`]: `DashMap` partitions behind `RwLock`s
//! - [`SqlStore`]: SQLite or MySQL through sqlx `Any`
//!
//! Both implement [`VersionStore`], [`TrackerStore`] and [`OwnerStateStore`],
//! and therefore [`HistoryStore`].

pub mod memory;
pub mod sql;
pub mod traits;
mod versioning;

pub use memory::InMemoryStore;
pub use sql::SqlStore;
pub use traits::{
    ApplyStats, ChangeSet, HistoryStore, Mutation, OwnerStateStore, StorageError, TrackerStore,
    VersionStore,
};
