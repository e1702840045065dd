// tests/store_gateway.rs
// Gateway behavior over misbehaving stores: throttled batch writes, retry
// exhaustion, and failing reads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use paper_watcher::retry::RetryPolicy;
use paper_watcher::store::{SeenGateway, SeenRecord, SeenStore, BATCH_WRITE_LIMIT};
use paper_watcher::{Item, Source};

fn item(id: &str) -> Item {
    Item {
        source: Source::Crossref,
        id: id.into(),
        title: "t".into(),
        summary: None,
        authors: vec![],
        journal: None,
        published_at: None,
        url: "https://example.test".into(),
        matched_keywords: vec![],
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
}

/// Rejects the tail of every batch for the first `reject_rounds` put calls,
/// then accepts everything. Mirrors a table store shedding load.
struct ThrottlingStore {
    accepted: Mutex<Vec<SeenRecord>>,
    puts: AtomicUsize,
    reject_rounds: usize,
}

impl ThrottlingStore {
    fn new(reject_rounds: usize) -> Self {
        Self {
            accepted: Mutex::new(Vec::new()),
            puts: AtomicUsize::new(0),
            reject_rounds,
        }
    }
}

#[async_trait]
impl SeenStore for ThrottlingStore {
    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.accepted.lock().unwrap().iter().any(|r| r.id == id))
    }

    async fn put(&self, records: &[SeenRecord]) -> Result<Vec<SeenRecord>> {
        assert!(records.len() <= BATCH_WRITE_LIMIT);
        let call = self.puts.fetch_add(1, Ordering::SeqCst);
        let keep = if call < self.reject_rounds {
            records.len() / 2
        } else {
            records.len()
        };
        self.accepted
            .lock()
            .unwrap()
            .extend_from_slice(&records[..keep]);
        Ok(records[keep..].to_vec())
    }
}

struct FailingStore;

#[async_trait]
impl SeenStore for FailingStore {
    async fn contains(&self, _id: &str) -> Result<bool> {
        Err(anyhow!("table offline"))
    }

    async fn put(&self, records: &[SeenRecord]) -> Result<Vec<SeenRecord>> {
        // Reject everything, forever.
        Ok(records.to_vec())
    }
}

#[tokio::test]
async fn rejected_remainders_are_retried_until_recorded() {
    let store = ThrottlingStore::new(1);
    let gateway = SeenGateway::new(&store, fast_retry());
    let items: Vec<Item> = (0..10).map(|i| item(&format!("id-{i}"))).collect();

    gateway.mark_seen(&items).await.unwrap();

    let accepted = store.accepted.lock().unwrap();
    assert_eq!(accepted.len(), 10);
    // First call rejected half, so at least one retry happened.
    assert!(store.puts.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn permanent_rejection_exhausts_retries() {
    let store = FailingStore;
    let gateway = SeenGateway::new(&store, fast_retry());

    let err = gateway.mark_seen(&[item("stuck")]).await.unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("retries exhausted"));
    assert!(msg.contains("1 records unrecorded"));
}

#[tokio::test]
async fn read_failure_is_fatal_after_retries() {
    let store = FailingStore;
    let gateway = SeenGateway::new(&store, fast_retry());

    let err = gateway.filter_unseen(vec![item("a")]).await.unwrap_err();
    assert!(format!("{err:#}").contains("seen-store read"));
}

#[tokio::test]
async fn batches_never_exceed_the_store_limit() {
    // The assert inside ThrottlingStore::put enforces the ceiling; 60 items
    // must arrive as 25 + 25 + 10.
    let store = ThrottlingStore::new(0);
    let gateway = SeenGateway::new(&store, fast_retry());
    let items: Vec<Item> = (0..60).map(|i| item(&format!("id-{i}"))).collect();

    gateway.mark_seen(&items).await.unwrap();
    assert_eq!(store.puts.load(Ordering::SeqCst), 3);
    assert_eq!(store.accepted.lock().unwrap().len(), 60);
}

#[tokio::test]
async fn duplicate_ids_within_a_run_stay_recorded_once() {
    let store = ThrottlingStore::new(0);
    let gateway = SeenGateway::new(&store, fast_retry());

    gateway.mark_seen(&[item("same")]).await.unwrap();
    assert!(store.contains("same").await.unwrap());

    let out = gateway
        .filter_unseen(vec![item("same"), item("fresh")])
        .await
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, "fresh");
}
