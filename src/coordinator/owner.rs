// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Running every data type of an owner, and many owners at once.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::data_type::{DataType, OwnerKind};
use crate::record::OwnerId;
use crate::storage::StorageError;
use crate::tracker::{CompositeView, DependencyGraph};

use super::types::{OrchestratorError, SyncOutcome};
use super::SyncOrchestrator;

impl SyncOrchestrator {
    /// Sync every data type of `owner` in prerequisite order.
    ///
    /// Types in the same level run concurrently; a level starts once the
    /// previous one has completed. Outcomes come back in execution order.
    #[tracing::instrument(skip_all, fields(owner = %owner, kind = ?kind))]
    pub async fn sync_owner(
        self: &Arc<Self>,
        owner: OwnerId,
        kind: OwnerKind,
        now: i64,
    ) -> Result<Vec<SyncOutcome>, OrchestratorError> {
        let graph = DependencyGraph::new(DataType::for_owner_kind(kind))?;
        let mut outcomes = Vec::with_capacity(graph.len());

        for (depth, level) in graph.levels().iter().enumerate() {
            debug!(level = depth, types = level.len(), "Starting dependency level");
            let mut tasks = JoinSet::new();
            for &data_type in level {
                let this = Arc::clone(self);
                tasks.spawn(async move { this.sync(owner, data_type, now).await });
            }

            let mut level_outcomes = Vec::with_capacity(level.len());
            let mut failure: Option<OrchestratorError> = None;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(outcome)) => level_outcomes.push(outcome),
                    Ok(Err(e)) => {
                        failure.get_or_insert(OrchestratorError::Storage(e));
                    }
                    Err(e) => {
                        failure.get_or_insert(OrchestratorError::Task(e.to_string()));
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }

            level_outcomes.sort_by_key(SyncOutcome::data_type);
            outcomes.extend(level_outcomes);
        }

        let completed = outcomes.iter().filter(|o| !o.is_not_due()).count();
        info!(cycles = completed, skipped = outcomes.len() - completed, "Owner sync pass complete");
        Ok(outcomes)
    }

    /// Sync several owners concurrently. The worker pool still bounds the
    /// total number of running cycles.
    pub async fn sync_owners(
        self: &Arc<Self>,
        owners: impl IntoIterator<Item = (OwnerId, OwnerKind)>,
        now: i64,
    ) -> Result<BTreeMap<OwnerId, Vec<SyncOutcome>>, OrchestratorError> {
        let mut tasks = JoinSet::new();
        for (owner, kind) in owners {
            let this = Arc::clone(self);
            tasks.spawn(async move { (owner, this.sync_owner(owner, kind, now).await) });
        }

        let mut results = BTreeMap::new();
        let mut failure: Option<OrchestratorError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((owner, Ok(outcomes))) => {
                    results.insert(owner, outcomes);
                }
                Ok((_, Err(e))) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(OrchestratorError::Task(e.to_string()));
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Aggregate status of the owner's cycles completed at or after `since`.
    pub async fn composite_view(
        &self,
        owner: OwnerId,
        kind: OwnerKind,
        since: i64,
    ) -> Result<CompositeView, StorageError> {
        let trackers = self.store.list_for_owner(owner).await?;
        Ok(CompositeView::from_trackers(
            owner,
            DataType::for_owner_kind(kind),
            since,
            &trackers,
        ))
    }
}
