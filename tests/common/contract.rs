// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Behaviour every `HistoryStore` backend must share.

use std::sync::Arc;

use serde_json::json;

use history_sync::query::AttributeQuery;
use history_sync::reconcile::reconcile;
use history_sync::{
    DataType, HistoryStore, OwnerId, RemoteSnapshot, StorageError, TrackerStatus, OPEN_END,
};

/// Two snapshots of contacts reconcile into the expected intervals.
pub async fn reconcile_history<S: HistoryStore>(store: &S, owner: OwnerId) {
    let dt = DataType::Contacts;
    let descriptor = dt.descriptor();
    let contact = |id: i64, standing: f64| json!({"contact_id": id, "standing": standing});

    let first = RemoteSnapshot::from_records(
        &descriptor,
        vec![contact(1, 5.0), contact(2, 0.0), contact(3, -10.0)],
    )
    .unwrap();
    let stats = reconcile(store, &descriptor, owner, 1_000, &first).await.unwrap();
    assert_eq!(stats.inserted, 3);

    let second = RemoteSnapshot::from_records(
        &descriptor,
        vec![contact(1, 5.0), contact(2, 10.0), contact(4, 1.0)],
    )
    .unwrap();
    let stats = reconcile(store, &descriptor, owner, 2_000, &second).await.unwrap();
    assert_eq!((stats.inserted, stats.evolved, stats.replaced), (1, 1, 1));

    let keys = |records: Vec<history_sync::VersionedRecord>| {
        records.into_iter().map(|r| r.natural_key).collect::<Vec<_>>()
    };
    let all = AttributeQuery::all();
    assert_eq!(keys(store.list_live(owner, dt, 1_500, &all).await.unwrap()), vec!["1", "2", "3"]);
    assert_eq!(keys(store.list_live(owner, dt, 2_000, &all).await.unwrap()), vec!["1", "2", "4"]);

    let history = store.history(owner, dt, "2").await.unwrap();
    let spans: Vec<(i64, i64)> = history.iter().map(|v| (v.valid_from, v.valid_to)).collect();
    assert_eq!(spans, vec![(1_000, 2_000), (2_000, OPEN_END)]);
    assert_eq!(history[1].payload["standing"], json!(10.0));

    assert_eq!(store.list_range(owner, dt, 0, OPEN_END, &all).await.unwrap().len(), 5);
}

/// Tracker lifecycle: one Pending per key, completion creates the next.
pub async fn tracker_lifecycle<S: HistoryStore>(store: &S, owner: OwnerId) {
    let dt = DataType::Skills;

    let pending = store.get_or_create_pending(owner, dt, 1_000).await.unwrap();
    assert_eq!(pending.status, TrackerStatus::Pending);
    assert_eq!(pending.scheduled_at, 1_000);
    let again = store.get_or_create_pending(owner, dt, 9_999).await.unwrap();
    assert_eq!(again.id, pending.id);
    assert_eq!(again.scheduled_at, 1_000);

    let started = store.mark_started(pending.id, 1_100).await.unwrap();
    assert_eq!(started.run_start, Some(1_100));

    let (done, next) = store
        .complete_cycle(
            pending.id,
            TrackerStatus::Finished,
            Some("ok".into()),
            1_200,
            5_000,
            Some(5_000),
        )
        .await
        .unwrap();
    assert_eq!(done.status, TrackerStatus::Finished);
    assert_eq!(done.run_end, Some(1_200));
    assert_eq!(done.detail.as_deref(), Some("ok"));
    assert_eq!(next.status, TrackerStatus::Pending);
    assert_eq!(next.scheduled_at, 5_000);
    assert_ne!(next.id, done.id);

    let err = store
        .complete_cycle(done.id, TrackerStatus::Error, None, 1_300, 6_000, Some(6_000))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::TrackerFinished(_)));
    let err = store
        .complete_cycle(next.id, TrackerStatus::Pending, None, 1_300, 6_000, Some(6_000))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidTransition { .. }));

    assert_eq!(store.pending(owner, dt).await.unwrap().map(|t| t.id), Some(next.id));
    assert_eq!(store.latest_terminal(owner, dt).await.unwrap().map(|t| t.id), Some(done.id));
    assert!(store.has_succeeded(owner, dt).await.unwrap());
    assert!(!store.has_succeeded(owner, DataType::Implants).await.unwrap());

    // Only the accepted completion moved the expiry
    assert_eq!(store.owner_state(owner).await.unwrap().expiry(dt), Some(5_000));

    let recent = store.recent_trackers(owner, dt, 10).await.unwrap();
    assert_eq!(recent.iter().map(|t| t.id).collect::<Vec<_>>(), vec![next.id, done.id]);
    assert_eq!(store.list_for_owner(owner).await.unwrap().len(), 2);

    store.set_expiry(owner, dt, 5_000).await.unwrap();
    store.set_expiry(owner, dt, 6_000).await.unwrap();
    let state = store.owner_state(owner).await.unwrap();
    assert_eq!(state.expiry(dt), Some(6_000));
    assert_eq!(state.expiry(DataType::Implants), None);
}

/// Concurrent callers all observe the same Pending tracker.
pub async fn concurrent_get_or_create<S: HistoryStore + 'static>(store: Arc<S>, owner: OwnerId) {
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        tasks.spawn(async move {
            store
                .get_or_create_pending(owner, DataType::Assets, 1_000 + i)
                .await
                .unwrap()
                .id
        });
    }

    let mut ids = Vec::new();
    while let Some(id) = tasks.join_next().await {
        ids.push(id.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "every caller must see one tracker");
    assert_eq!(store.list_for_owner(owner).await.unwrap().len(), 1);
}
