// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # History Sync
//!
//! Periodically pulls owner-scoped data (characters, corporations) from a
//! remote game API and keeps it as a complete, queryable history: for every
//! tracked fact you can ask what its value was at any past time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SyncOrchestrator                        │
//! │  • Per-owner task graph, levels from prerequisites         │
//! │  • Shared worker semaphore bounds running cycles           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Trackers & Scheduling                      │
//! │  • One Pending tracker per (owner, data type)              │
//! │  • Cache-hint refresh, capped exponential error backoff    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RemoteSource                            │
//! │  • Single / paged / cursor listings                        │
//! │  • Timeout + per-data-type circuit breaker                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Reconciliation                           │
//! │  • Full-Sync-Replace or Append-Only diff by natural key    │
//! │  • One change set, applied all-or-nothing                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Versioned Record Store                         │
//! │  • [valid_from, valid_to) intervals, one open per key      │
//! │  • In-memory or SQLite/MySQL (sqlx Any)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use history_sync::{
//!     DataType, HistorySyncConfig, OwnerId, OwnerKind, PageRequest, RemoteError,
//!     RemotePage, RemoteSource, SyncOrchestrator, VersionStore,
//! };
//! use history_sync::query::AttributeQuery;
//!
//! struct Api;
//!
//! #[async_trait]
//! impl RemoteSource for Api {
//!     async fn fetch_page(
//!         &self,
//!         _owner: OwnerId,
//!         _data_type: DataType,
//!         _request: PageRequest,
//!     ) -> Result<RemotePage, RemoteError> {
//!         Ok(RemotePage::default())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = Arc::new(SyncOrchestrator::new(HistorySyncConfig::default(), Arc::new(Api)));
//!     let owner = OwnerId(90000001);
//!
//!     orchestrator.sync_owner(owner, OwnerKind::Character, 1_000).await.unwrap();
//!
//!     let contacts = orchestrator
//!         .store()
//!         .list_live(owner, DataType::Contacts, 1_000, &AttributeQuery::all())
//!         .await
//!         .unwrap();
//!     println!("{} contacts", contacts.len());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: [`SyncOrchestrator`], one cycle and the owner task graph
//! - [`storage`]: versioned record, tracker and owner state stores
//! - [`reconcile`]: snapshot diffing
//! - [`tracker`]: tracker state, scheduling, prerequisites, composite view
//! - [`query`]: attribute predicates over payloads
//! - [`remote`]: the remote API boundary
//! - [`resilience`]: retry with backoff, circuit breakers

pub mod config;
pub mod coordinator;
pub mod data_type;
pub mod metrics;
pub mod query;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod resilience;
pub mod storage;
pub mod tracker;

pub use config::HistorySyncConfig;
pub use coordinator::{FailureKind, OrchestratorError, SyncOrchestrator, SyncOutcome, SyncReport};
pub use data_type::{DataType, DataTypeDescriptor, FetchShape, KeyError, OwnerKind, ReconcilePolicy};
pub use metrics::LatencyTimer;
pub use reconcile::{ReconcileError, RemoteSnapshot};
pub use record::{OwnerId, VersionedRecord, OPEN_END};
pub use remote::{CacheHint, PageRequest, RemoteError, RemotePage, RemoteSource};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, RemoteCircuits};
pub use resilience::retry::RetryConfig;
pub use storage::traits::{
    ApplyStats, ChangeSet, HistoryStore, Mutation, OwnerStateStore, StorageError, TrackerStore,
    VersionStore,
};
pub use storage::{InMemoryStore, SqlStore};
pub use tracker::{CompositeView, DependencyGraph, OwnerSyncState, SyncTracker, TrackerStatus};
