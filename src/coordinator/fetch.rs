// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Assembling a complete remote snapshot from one or more pages.

use serde_json::Value;
use tokio::time::timeout;
use tracing::debug;

use crate::data_type::{DataType, DataTypeDescriptor, FetchShape};
use crate::metrics::{self, LatencyTimer};
use crate::record::OwnerId;
use crate::remote::{CacheHint, PageRequest, RemoteError, RemotePage};
use crate::resilience::circuit_breaker::CircuitError;

use super::types::CycleError;
use super::SyncOrchestrator;

/// Every record of one listing, in remote order.
#[derive(Debug, Default)]
pub(super) struct FetchedSnapshot {
    pub records: Vec<Value>,
    pub hints: Vec<CacheHint>,
    pub pages: usize,
}

impl FetchedSnapshot {
    fn push(&mut self, page: RemotePage) {
        self.pages += 1;
        self.hints.push(page.cache_hint);
        self.records.extend(page.records);
    }
}

impl SyncOrchestrator {
    pub(super) async fn fetch_snapshot(
        &self,
        owner: OwnerId,
        descriptor: &DataTypeDescriptor,
    ) -> Result<FetchedSnapshot, CycleError> {
        let data_type = descriptor.data_type;
        let snapshot = match descriptor.fetch {
            FetchShape::Single => {
                let mut snapshot = FetchedSnapshot::default();
                snapshot.push(self.fetch_page(owner, data_type, PageRequest::Single).await?);
                snapshot
            }
            FetchShape::Paged => self.fetch_paged(owner, data_type).await?,
            FetchShape::Cursor { id_field } => self.fetch_cursor(owner, data_type, id_field).await?,
        };

        metrics::record_pages_fetched(data_type.as_str(), snapshot.pages);
        metrics::record_snapshot_size(data_type.as_str(), snapshot.records.len());
        debug!(
            owner = %owner,
            data_type = %data_type,
            pages = snapshot.pages,
            records = snapshot.records.len(),
            "Fetched remote snapshot"
        );
        Ok(snapshot)
    }

    /// Page 1 reports the page count; the rest follow in order.
    async fn fetch_paged(
        &self,
        owner: OwnerId,
        data_type: DataType,
    ) -> Result<FetchedSnapshot, CycleError> {
        let first = self.fetch_page(owner, data_type, PageRequest::Page(1)).await?;
        let total = first.total_pages.unwrap_or(1).max(1);
        if total as usize > self.config.max_pages {
            return Err(CycleError::Malformed(format!(
                "remote reports {} pages, limit is {}",
                total, self.config.max_pages
            )));
        }

        let mut snapshot = FetchedSnapshot::default();
        snapshot.push(first);
        for page in 2..=total {
            snapshot.push(self.fetch_page(owner, data_type, PageRequest::Page(page)).await?);
        }
        Ok(snapshot)
    }

    /// Walk backwards from the newest record until an empty page. Each page's
    /// smallest id is the next boundary and must keep decreasing.
    async fn fetch_cursor(
        &self,
        owner: OwnerId,
        data_type: DataType,
        id_field: &str,
    ) -> Result<FetchedSnapshot, CycleError> {
        let mut snapshot = FetchedSnapshot::default();
        let mut boundary: Option<i64> = None;

        loop {
            if snapshot.pages >= self.config.max_pages {
                return Err(CycleError::Malformed(format!(
                    "cursor walk exceeded {} pages",
                    self.config.max_pages
                )));
            }
            let page = self.fetch_page(owner, data_type, PageRequest::Before(boundary)).await?;
            if page.records.is_empty() {
                snapshot.push(page);
                break;
            }

            let mut lowest = i64::MAX;
            for record in &page.records {
                let id = record.get(id_field).and_then(Value::as_i64).ok_or_else(|| {
                    CycleError::Malformed(format!("record without integer '{}'", id_field))
                })?;
                lowest = lowest.min(id);
            }
            if boundary.is_some_and(|b| lowest >= b) {
                return Err(CycleError::Malformed(format!(
                    "cursor did not advance past {}",
                    lowest
                )));
            }
            boundary = Some(lowest);
            snapshot.push(page);
        }
        Ok(snapshot)
    }

    /// One remote call through the owner's breaker for this data type,
    /// bounded by the fetch timeout.
    async fn fetch_page(
        &self,
        owner: OwnerId,
        data_type: DataType,
        request: PageRequest,
    ) -> Result<RemotePage, RemoteError> {
        let circuit = self.circuits.for_endpoint(owner, data_type);
        let limit = self.config.fetch_timeout();
        let remote = &self.remote;
        let _timer = LatencyTimer::new(data_type.as_str());

        let result = circuit
            .call(|| async move {
                match timeout(limit, remote.fetch_page(owner, data_type, request)).await {
                    Ok(page) => page,
                    Err(_) => {
                        metrics::record_remote_timeout(data_type.as_str());
                        Err(RemoteError::Timeout(limit.as_millis() as u64))
                    }
                }
            })
            .await;

        match result {
            Ok(page) => Ok(page),
            Err(CircuitError::Rejected) => Err(RemoteError::CircuitOpen(data_type)),
            Err(CircuitError::Inner(e)) => Err(e),
        }
    }
}
