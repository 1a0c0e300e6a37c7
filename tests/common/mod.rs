// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test doubles: a scripted remote and a store whose writes can fail.

#![allow(dead_code)]

pub mod contract;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use history_sync::query::AttributeQuery;
use history_sync::{
    ApplyStats, CacheHint, ChangeSet, DataType, InMemoryStore, OwnerId, OwnerStateStore,
    OwnerSyncState, PageRequest, RemoteError, RemotePage, RemoteSource, StorageError,
    SyncTracker, TrackerStatus, TrackerStore, VersionStore, VersionedRecord,
};

/// What the remote does for one request.
pub enum Reply {
    Page(Result<RemotePage, RemoteError>),
    /// Never answers
    Hang,
}

type Handler = Arc<dyn Fn(PageRequest) -> Reply + Send + Sync>;

/// Remote double answering from per-(owner, data type) handlers.
///
/// Unscripted endpoints answer with an empty page.
#[derive(Default)]
pub struct ScriptedRemote {
    handlers: Mutex<HashMap<(OwnerId, DataType), Handler>>,
    calls: Mutex<Vec<(OwnerId, DataType, PageRequest)>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script<F>(&self, owner: OwnerId, data_type: DataType, handler: F)
    where
        F: Fn(PageRequest) -> Reply + Send + Sync + 'static,
    {
        self.handlers.lock().insert((owner, data_type), Arc::new(handler));
    }

    /// Every call answers with `records` as a single page.
    pub fn single(&self, owner: OwnerId, data_type: DataType, records: Vec<Value>, hint: CacheHint) {
        self.script(owner, data_type, move |_| {
            Reply::Page(Ok(RemotePage::new(records.clone()).with_cache_hint(hint.clone())))
        });
    }

    /// `Page(n)` answers with `pages[n - 1]`; page 1 reports the total.
    pub fn paged(&self, owner: OwnerId, data_type: DataType, pages: Vec<Vec<Value>>) {
        let total = pages.len() as u32;
        self.script(owner, data_type, move |request| match request {
            PageRequest::Page(n) => {
                let records = pages.get(n as usize - 1).cloned().unwrap_or_default();
                let page = RemotePage::new(records);
                Reply::Page(Ok(if n == 1 { page.with_total_pages(total) } else { page }))
            }
            other => Reply::Page(Err(RemoteError::Malformed(format!("unexpected {:?}", other)))),
        });
    }

    /// `Before(b)` answers with up to `page_size` records with `id_field < b`,
    /// newest first.
    pub fn cursor(
        &self,
        owner: OwnerId,
        data_type: DataType,
        id_field: &'static str,
        records: Vec<Value>,
        page_size: usize,
    ) {
        self.script(owner, data_type, move |request| match request {
            PageRequest::Before(boundary) => {
                let mut page: Vec<Value> = records
                    .iter()
                    .filter(|r| {
                        let id = r[id_field].as_i64().unwrap();
                        boundary.map_or(true, |b| id < b)
                    })
                    .cloned()
                    .collect();
                page.sort_by_key(|r| std::cmp::Reverse(r[id_field].as_i64().unwrap()));
                page.truncate(page_size);
                Reply::Page(Ok(RemotePage::new(page)))
            }
            other => Reply::Page(Err(RemoteError::Malformed(format!("unexpected {:?}", other)))),
        });
    }

    pub fn fail(&self, owner: OwnerId, data_type: DataType, err: RemoteError) {
        self.script(owner, data_type, move |_| Reply::Page(Err(err.clone())));
    }

    pub fn hang(&self, owner: OwnerId, data_type: DataType) {
        self.script(owner, data_type, |_| Reply::Hang);
    }

    /// Delay every answer, to observe concurrency.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self, owner: OwnerId, data_type: DataType) -> Vec<PageRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|(o, dt, _)| *o == owner && *dt == data_type)
            .map(|(_, _, r)| *r)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSource for ScriptedRemote {
    async fn fetch_page(
        &self,
        owner: OwnerId,
        data_type: DataType,
        request: PageRequest,
    ) -> Result<RemotePage, RemoteError> {
        self.calls.lock().push((owner, data_type, request));
        let handler = self.handlers.lock().get(&(owner, data_type)).cloned();
        let delay = *self.delay.lock();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match handler.map(|h| h(request)) {
            None => Ok(RemotePage::default()),
            Some(Reply::Page(result)) => result,
            Some(Reply::Hang) => std::future::pending().await,
        }
    }
}

/// In-memory store whose `apply` fails with a backend error while `broken`
/// is set, and whose `complete_cycle` fails while `completion_broken` is set.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub broken: AtomicBool,
    pub completion_broken: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn set_completion_broken(&self, broken: bool) {
        self.completion_broken.store(broken, Ordering::SeqCst);
    }
}

#[async_trait]
impl VersionStore for FlakyStore {
    async fn get_live(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
        as_of: i64,
    ) -> Result<Option<VersionedRecord>, StorageError> {
        self.inner.get_live(owner, data_type, natural_key, as_of).await
    }

    async fn list_live(
        &self,
        owner: OwnerId,
        data_type: DataType,
        as_of: i64,
        query: &AttributeQuery,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        self.inner.list_live(owner, data_type, as_of, query).await
    }

    async fn list_range(
        &self,
        owner: OwnerId,
        data_type: DataType,
        from: i64,
        to: i64,
        query: &AttributeQuery,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        self.inner.list_range(owner, data_type, from, to, query).await
    }

    async fn history(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        self.inner.history(owner, data_type, natural_key).await
    }

    async fn apply(&self, change_set: &ChangeSet) -> Result<ApplyStats, StorageError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection reset".into()));
        }
        self.inner.apply(change_set).await
    }
}

#[async_trait]
impl TrackerStore for FlakyStore {
    async fn get_or_create_pending(
        &self,
        owner: OwnerId,
        data_type: DataType,
        scheduled_at: i64,
    ) -> Result<SyncTracker, StorageError> {
        self.inner.get_or_create_pending(owner, data_type, scheduled_at).await
    }

    async fn pending(
        &self,
        owner: OwnerId,
        data_type: DataType,
    ) -> Result<Option<SyncTracker>, StorageError> {
        self.inner.pending(owner, data_type).await
    }

    async fn mark_started(&self, id: i64, run_start: i64) -> Result<SyncTracker, StorageError> {
        self.inner.mark_started(id, run_start).await
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
        if self.completion_broken.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection reset".into()));
        }
        self.inner
            .complete_cycle(id, status, detail, run_end, next_scheduled_at, expires_at)
            .await
    }

    async fn has_succeeded(&self, owner: OwnerId, data_type: DataType) -> Result<bool, StorageError> {
        self.inner.has_succeeded(owner, data_type).await
    }

    async fn latest_terminal(
        &self,
        owner: OwnerId,
        data_type: DataType,
    ) -> Result<Option<SyncTracker>, StorageError> {
        self.inner.latest_terminal(owner, data_type).await
    }

    async fn recent_trackers(
        &self,
        owner: OwnerId,
        data_type: DataType,
        limit: usize,
    ) -> Result<Vec<SyncTracker>, StorageError> {
        self.inner.recent_trackers(owner, data_type, limit).await
    }

    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<SyncTracker>, StorageError> {
        self.inner.list_for_owner(owner).await
    }
}

#[async_trait]
impl OwnerStateStore for FlakyStore {
    async fn owner_state(&self, owner: OwnerId) -> Result<OwnerSyncState, StorageError> {
        self.inner.owner_state(owner).await
    }

    async fn set_expiry(
        &self,
        owner: OwnerId,
        data_type: DataType,
        expires_at: i64,
    ) -> Result<(), StorageError> {
        self.inner.set_expiry(owner, data_type, expires_at).await
    }
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
