// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation against the in-memory store, without a remote.
//!
//! Run with: `cargo test --test reconciliation`

use serde_json::{json, Value};

use history_sync::query::{AttributeQuery, QueryBuilder};
use history_sync::reconcile::reconcile;
use history_sync::{
    DataType, InMemoryStore, OwnerId, RemoteSnapshot, StorageError, VersionStore, OPEN_END,
};

const OWNER: OwnerId = OwnerId(90_000_001);

fn snapshot(data_type: DataType, records: Vec<Value>) -> RemoteSnapshot {
    RemoteSnapshot::from_records(&data_type.descriptor(), records).unwrap()
}

async fn sync(store: &InMemoryStore, data_type: DataType, at: i64, records: Vec<Value>) {
    reconcile(store, &data_type.descriptor(), OWNER, at, &snapshot(data_type, records))
        .await
        .unwrap();
}

fn order(id: i64, price: f64, state: &str) -> Value {
    json!({"order_id": id, "price": price, "state": state, "type_id": 34})
}

#[tokio::test]
async fn market_orders_lifecycle() {
    let store = InMemoryStore::new();
    let dt = DataType::MarketOrders;

    sync(&store, dt, 1_000, vec![order(1, 5.0, "open"), order(2, 7.5, "open")]).await;
    sync(&store, dt, 2_000, vec![order(1, 4.5, "open"), order(2, 7.5, "open")]).await;
    sync(&store, dt, 3_000, vec![order(1, 4.5, "open")]).await;
    sync(&store, dt, 4_000, vec![order(1, 4.5, "open"), order(2, 7.5, "open")]).await;

    let one = store.history(OWNER, dt, "1").await.unwrap();
    let spans: Vec<(i64, i64)> = one.iter().map(|v| (v.valid_from, v.valid_to)).collect();
    assert_eq!(spans, vec![(1_000, 2_000), (2_000, OPEN_END)]);

    // Key 2 disappeared at 3000 and came back at 4000
    let two = store.history(OWNER, dt, "2").await.unwrap();
    let spans: Vec<(i64, i64)> = two.iter().map(|v| (v.valid_from, v.valid_to)).collect();
    assert_eq!(spans, vec![(1_000, 3_000), (4_000, OPEN_END)]);
    assert!(store.get_live(OWNER, dt, "2", 3_500).await.unwrap().is_none());
}

#[tokio::test]
async fn float_noise_below_precision_is_not_a_change() {
    let store = InMemoryStore::new();
    let dt = DataType::MarketOrders;

    sync(&store, dt, 1_000, vec![order(1, 5.0, "open")]).await;
    sync(&store, dt, 2_000, vec![order(1, 5.000_000_1, "open")]).await;

    assert_eq!(store.history(OWNER, dt, "1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn append_only_never_closes_versions() {
    let store = InMemoryStore::new();
    let dt = DataType::Notifications;
    let note = |id: i64, text: &str| json!({"notification_id": id, "text": text});

    sync(&store, dt, 1_000, vec![note(1, "war declared"), note(2, "structure attacked")]).await;
    // Remote dropped 1 and rewrote 2; neither is stored history's concern
    sync(&store, dt, 2_000, vec![note(2, "edited"), note(3, "new")]).await;

    let live = store.list_live(OWNER, dt, 2_000, &AttributeQuery::all()).await.unwrap();
    assert_eq!(live.len(), 3);
    assert!(live.iter().all(|v| v.is_open()));
    let two = store.get_live(OWNER, dt, "2", 2_000).await.unwrap().unwrap();
    assert_eq!(two.payload["text"], json!("structure attacked"));
}

#[tokio::test]
async fn empty_full_sync_snapshot_closes_everything() {
    let store = InMemoryStore::new();
    let dt = DataType::Implants;

    sync(&store, dt, 1_000, vec![json!({"type_id": 1}), json!({"type_id": 2})]).await;
    sync(&store, dt, 2_000, vec![]).await;

    assert!(store.list_live(OWNER, dt, 2_000, &AttributeQuery::all()).await.unwrap().is_empty());
    assert_eq!(store.list_live(OWNER, dt, 1_999, &AttributeQuery::all()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn composite_keys_are_tracked_independently() {
    let store = InMemoryStore::new();
    let dt = DataType::ContractBids;
    let bid = |contract: i64, bid: i64, amount: f64| {
        json!({"contract_id": contract, "bid_id": bid, "amount": amount})
    };

    sync(&store, dt, 1_000, vec![bid(10, 1, 100.0), bid(11, 1, 200.0)]).await;
    sync(&store, dt, 2_000, vec![bid(10, 1, 100.0), bid(11, 1, 250.0)]).await;

    assert_eq!(store.history(OWNER, dt, "10:1").await.unwrap().len(), 1);
    assert_eq!(store.history(OWNER, dt, "11:1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn owners_are_isolated() {
    let store = InMemoryStore::new();
    let dt = DataType::Implants;
    let other = OwnerId(90_000_002);

    sync(&store, dt, 1_000, vec![json!({"type_id": 1})]).await;
    reconcile(&store, &dt.descriptor(), other, 1_000, &snapshot(dt, vec![])).await.unwrap();

    assert_eq!(store.list_live(OWNER, dt, 1_000, &AttributeQuery::all()).await.unwrap().len(), 1);
    assert!(store.list_live(other, dt, 1_000, &AttributeQuery::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn conflicting_change_set_is_rejected_whole() {
    let store = InMemoryStore::new();
    let dt = DataType::MarketOrders;
    sync(&store, dt, 5_000, vec![order(1, 5.0, "open")]).await;

    // A sync at an earlier time would insert key 2 and overlap key 1's future version
    let err = reconcile(
        &store,
        &dt.descriptor(),
        OWNER,
        1_000,
        &snapshot(dt, vec![order(2, 1.0, "open"), order(1, 4.0, "open")]),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        history_sync::ReconcileError::Storage(StorageError::Conflict { .. })
    ));
    assert!(store.history(OWNER, dt, "2").await.unwrap().is_empty());
    assert_eq!(store.version_count(), 1);
}

// =============================================================================
// Queries over history
// =============================================================================

#[tokio::test]
async fn attribute_query_filters_live_versions() {
    let store = InMemoryStore::new();
    let dt = DataType::Contacts;
    let contact = |id: i64, standing: f64, kind: &str| {
        json!({"contact_id": id, "standing": standing, "contact_type": kind})
    };

    sync(
        &store,
        dt,
        1_000,
        vec![
            contact(1, 10.0, "character"),
            contact(2, -5.0, "character"),
            contact(3, 5.0, "alliance"),
        ],
    )
    .await;

    let friendly_characters = QueryBuilder::new()
        .equals("contact_type", "character")
        .range("standing", Some(0.0), None)
        .build_and();
    let live = store.list_live(OWNER, dt, 1_000, &friendly_characters).await.unwrap();
    let keys: Vec<&str> = live.iter().map(|v| v.natural_key.as_str()).collect();
    assert_eq!(keys, vec!["1"]);

    let not_alliances = AttributeQuery::equals("contact_type", "alliance").negate();
    assert_eq!(store.list_live(OWNER, dt, 1_000, &not_alliances).await.unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_field_path_is_rejected() {
    let store = InMemoryStore::new();
    let bad = AttributeQuery::equals("standing') OR 1=1 --", 1);
    let err = store
        .list_live(OWNER, DataType::Contacts, 0, &bad)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidQuery(_)));
}

#[tokio::test]
async fn range_listing_returns_every_intersecting_version() {
    let store = InMemoryStore::new();
    let dt = DataType::MarketOrders;

    sync(&store, dt, 1_000, vec![order(1, 1.0, "open")]).await;
    sync(&store, dt, 2_000, vec![order(1, 2.0, "open")]).await;
    sync(&store, dt, 3_000, vec![order(1, 3.0, "open")]).await;

    let all = AttributeQuery::all();
    assert_eq!(store.list_range(OWNER, dt, 0, OPEN_END, &all).await.unwrap().len(), 3);
    assert_eq!(store.list_range(OWNER, dt, 1_500, 2_500, &all).await.unwrap().len(), 2);
    // Half-open: a version ending at 2000 doesn't intersect [2000, 2001)
    let at_boundary = store.list_range(OWNER, dt, 2_000, 2_001, &all).await.unwrap();
    assert_eq!(at_boundary.len(), 1);
    assert_eq!(at_boundary[0].valid_from, 2_000);
    assert!(store.list_range(OWNER, dt, 0, 1_000, &all).await.unwrap().is_empty());
}
