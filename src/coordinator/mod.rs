// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator.
//!
//! The [`SyncOrchestrator`] ties the components together for one
//! (owner, data type) cycle:
//!
//! ```text
//! get-or-create Pending ─▶ due? ─no──▶ NotDue
//!                           │yes
//!                           ▼
//!                  prerequisites finished? ─no──▶ Error (no remote call)
//!                           │yes
//!                           ▼
//!         fetch (single | paged | cursor), timeout + circuit breaker
//!                           │
//!                           ▼
//!            reconcile in one transaction ─conflict──▶ Error (long backoff)
//!                           │
//!                           ▼
//!        Finished | Warning, expiry updated, next Pending at cache hint
//! ```
//!
//! [`SyncOrchestrator::sync_owner`] runs every data type of an owner level by
//! level through the prerequisite graph, each cycle holding a permit of the
//! shared worker pool.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use history_sync::{HistorySyncConfig, OwnerId, OwnerKind, RemoteSource, SyncOrchestrator};
//!
//! # async fn example(remote: Arc<dyn RemoteSource>, now: i64) {
//! let config = HistorySyncConfig {
//!     sql_url: Some("sqlite:history.db?mode=rwc".into()),
//!     ..Default::default()
//! };
//! let orchestrator = Arc::new(SyncOrchestrator::connect(config, remote).await.expect("connect"));
//!
//! let outcomes = orchestrator
//!     .sync_owner(OwnerId(90000001), OwnerKind::Character, now)
//!     .await
//!     .expect("persistence available");
//! println!("{} cycles", outcomes.len());
//! # }
//! ```

mod cycle;
mod fetch;
mod owner;
mod types;

pub use types::{FailureKind, OrchestratorError, SyncOutcome, SyncReport};

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use crate::config::HistorySyncConfig;
use crate::remote::RemoteSource;
use crate::resilience::circuit_breaker::RemoteCircuits;
use crate::storage::{HistoryStore, InMemoryStore, SqlStore, StorageError};
use crate::tracker::SchedulePolicy;

/// Drives sync cycles against a store and a remote source.
///
/// `Send + Sync`; share it behind an `Arc` to run owners concurrently.
pub struct SyncOrchestrator {
    pub(super) config: HistorySyncConfig,
    pub(super) store: Arc<dyn HistoryStore>,
    pub(super) remote: Arc<dyn RemoteSource>,
    pub(super) circuits: RemoteCircuits,
    pub(super) schedule: SchedulePolicy,
    /// Bounds concurrently running cycles across all owners
    pub(super) workers: Semaphore,
    pub(super) active: AtomicUsize,
}

impl SyncOrchestrator {
    /// Orchestrator over an in-memory store.
    pub fn new(config: HistorySyncConfig, remote: Arc<dyn RemoteSource>) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()), remote)
    }

    pub fn with_store(
        config: HistorySyncConfig,
        store: Arc<dyn HistoryStore>,
        remote: Arc<dyn RemoteSource>,
    ) -> Self {
        Self {
            circuits: RemoteCircuits::new(config.remote_circuit()),
            schedule: SchedulePolicy::from_config(&config),
            workers: Semaphore::new(config.max_concurrent_syncs.max(1)),
            active: AtomicUsize::new(0),
            config,
            store,
            remote,
        }
    }

    /// SQL-backed when `sql_url` is set, in-memory otherwise.
    pub async fn connect(
        config: HistorySyncConfig,
        remote: Arc<dyn RemoteSource>,
    ) -> Result<Self, StorageError> {
        match config.sql_url.clone() {
            Some(url) => {
                let store = SqlStore::new(&url, config.sql_max_connections).await?;
                info!(max_concurrent_syncs = config.max_concurrent_syncs, "History store connected");
                Ok(Self::with_store(config, Arc::new(store), remote))
            }
            None => {
                info!("No sql_url configured, keeping history in memory");
                Ok(Self::new(config, remote))
            }
        }
    }

    #[must_use]
    pub fn config(&self) -> &HistorySyncConfig {
        &self.config
    }

    /// The underlying store, for history queries.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Remote circuit breakers, one per owner and data type.
    #[must_use]
    pub fn circuits(&self) -> &RemoteCircuits {
        &self.circuits
    }
}
