// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync trackers and scheduling.
//!
//! A [`SyncTracker`] records one (owner, data type) cycle:
//!
//! ```text
//!            complete_cycle
//! Pending ─────────────────▶ Finished | Warning | Error
//!                                 │
//!                                 └──▶ next Pending (same atomic step)
//! ```
//!
//! - [`SchedulePolicy`]: when the next Pending is due
//! - [`DependencyGraph`]: prerequisite levels between data types
//! - [`CompositeView`]: one status over all of an owner's endpoints

pub mod composite;
pub mod dependency;
pub mod schedule;
pub mod types;

pub use composite::CompositeView;
pub use dependency::{DependencyError, DependencyGraph};
pub use schedule::SchedulePolicy;
pub use types::{OwnerSyncState, SyncTracker, TrackerStatus};
