// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic history-sync usage example.
//!
//! Demonstrates:
//! 1. An orchestrator over the in-memory store and a canned remote
//! 2. Two sync passes for one character, an hour apart
//! 3. Reading the current state, a past state and one key's history
//! 4. The owner's composite status
//! 5. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Value};

use history_sync::query::{AttributeQuery, QueryBuilder};
use history_sync::{
    CacheHint, DataType, HistorySyncConfig, OwnerId, OwnerKind, PageRequest, RemoteError,
    RemotePage, RemoteSource, SyncOrchestrator, SyncOutcome, VersionStore,
};

const HOUR_MS: i64 = 3_600_000;

/// Serves a fixed contact list; after `advance()` one contact changes
/// standing, one is removed and one is added.
#[derive(Default)]
struct CannedApi {
    later: AtomicBool,
}

impl CannedApi {
    fn advance(&self) {
        self.later.store(true, Ordering::SeqCst);
    }

    fn contacts(&self) -> Vec<Value> {
        if self.later.load(Ordering::SeqCst) {
            vec![
                json!({"contact_id": 2112625428, "contact_type": "character", "standing": 10.0}),
                json!({"contact_id": 99000001, "contact_type": "alliance", "standing": 5.0}),
                json!({"contact_id": 1000125, "contact_type": "corporation", "standing": -10.0}),
            ]
        } else {
            vec![
                json!({"contact_id": 2112625428, "contact_type": "character", "standing": 5.0}),
                json!({"contact_id": 99000001, "contact_type": "alliance", "standing": 5.0}),
                json!({"contact_id": 98000042, "contact_type": "corporation", "standing": -5.0}),
            ]
        }
    }
}

#[async_trait]
impl RemoteSource for CannedApi {
    async fn fetch_page(
        &self,
        _owner: OwnerId,
        data_type: DataType,
        request: PageRequest,
    ) -> Result<RemotePage, RemoteError> {
        match (data_type, request) {
            (DataType::Contacts, PageRequest::Page(1)) => {
                Ok(RemotePage::new(self.contacts()).with_total_pages(1))
            }
            (DataType::Skills, _) => Ok(RemotePage::new(vec![
                json!({"skill_id": 3300, "trained_level": 5, "skillpoints": 256000}),
                json!({"skill_id": 3402, "trained_level": 3, "skillpoints": 8000}),
            ])
            .with_cache_hint(CacheHint::HttpDate("Wed, 21 Oct 2026 07:28:00 GMT".into()))),
            _ => Ok(RemotePage::default()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           history-sync: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure the orchestrator
    // ─────────────────────────────────────────────────────────────────────────
    let api = Arc::new(CannedApi::default());
    let config = HistorySyncConfig {
        default_refresh_secs: 3_600,
        ..Default::default()
    };
    let orchestrator = Arc::new(SyncOrchestrator::connect(config, api.clone()).await?);
    let owner = OwnerId(90000001);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Two passes, an hour apart
    // ─────────────────────────────────────────────────────────────────────────
    let t0 = 1_792_000_000_000;
    let first = orchestrator.sync_owner(owner, OwnerKind::Character, t0).await?;
    print_pass("First pass", &first);

    api.advance();
    let t1 = t0 + HOUR_MS;
    let second = orchestrator.sync_owner(owner, OwnerKind::Character, t1).await?;
    print_pass("Second pass", &second);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Read history
    // ─────────────────────────────────────────────────────────────────────────
    let store = orchestrator.store();
    let all = AttributeQuery::all();

    println!("\n📇 Contacts now:");
    for contact in store.list_live(owner, DataType::Contacts, t1, &all).await? {
        println!("   {} → {}", contact.natural_key, contact.payload["standing"]);
    }

    println!("\n📇 Contacts at the first pass:");
    for contact in store.list_live(owner, DataType::Contacts, t0, &all).await? {
        println!("   {} → {}", contact.natural_key, contact.payload["standing"]);
    }

    let hostile = QueryBuilder::new().range("standing", None, Some(-0.01)).build_and();
    let hostile_now = store.list_live(owner, DataType::Contacts, t1, &hostile).await?;
    println!("\n⚔️  Hostile contacts now: {}", hostile_now.len());

    println!("\n🕰  History of contact 2112625428:");
    for version in store.history(owner, DataType::Contacts, "2112625428").await? {
        let end = if version.is_open() {
            "open".to_string()
        } else {
            version.valid_to.to_string()
        };
        println!(
            "   [{}, {}) standing={}",
            version.valid_from, end, version.payload["standing"]
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Composite status
    // ─────────────────────────────────────────────────────────────────────────
    let view = orchestrator
        .composite_view(owner, OwnerKind::Character, t1)
        .await?;
    println!("\n📊 Composite status since second pass: {}", view.status());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n✅ Done");
    Ok(())
}

fn print_pass(label: &str, outcomes: &[SyncOutcome]) {
    let ran = outcomes.iter().filter_map(SyncOutcome::report).count();
    println!("🔄 {}: {} cycles ran, {} not due", label, ran, outcomes.len() - ran);
    for report in outcomes.iter().filter_map(SyncOutcome::report) {
        if report.stats.total() > 0 {
            println!(
                "   {} {}: +{} ~{} -{}",
                report.data_type,
                report.status,
                report.stats.inserted,
                report.stats.replaced,
                report.stats.evolved
            );
        }
    }
}

/// Dump every captured metric, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = vec![];
    let mut gauges = vec![];
    let mut histograms = vec![];

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key
            .labels()
            .map(|l| format!("{}={}", l.key(), l.value()))
            .collect();
        let name = format!("{}{{{}}}", key.name(), labels.join(","));

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => histograms.push((name, samples.len())),
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort();

    for (name, value) in &counters {
        println!("   counter   {} = {}", name, value);
    }
    for (name, value) in &gauges {
        println!("   gauge     {} = {:.0}", name, value);
    }
    for (name, count) in &histograms {
        println!("   histogram {} samples={}", name, count);
    }
}
