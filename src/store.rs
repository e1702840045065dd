// src/store.rs
// Seen-store gateway: the durable "never notify twice" guarantee.
//
// The store itself is an external collaborator behind the `SeenStore` trait;
// the gateway adds chunking and retry on top and owns the mark-after-dispatch
// ordering contract together with the pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::Item;
use crate::retry::{RetryError, RetryPolicy};

/// Store batch-write limit, matching the common table-store ceiling.
pub const BATCH_WRITE_LIMIT: usize = 25;

const TITLE_LIMIT: usize = 400;

/// Persisted dedup record. Once a record exists for an id, the corresponding
/// item must never appear in a future digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenRecord {
    pub id: String,
    pub source: String,
    pub title: String,
    pub first_seen_at: DateTime<Utc>,
}

impl SeenRecord {
    pub fn from_item(item: &Item, now: DateTime<Utc>) -> Self {
        Self {
            id: item.id.clone(),
            source: item.source.as_str().to_string(),
            title: item.title.chars().take(TITLE_LIMIT).collect(),
            first_seen_at: now,
        }
    }
}

/// Client interface for the persistent store.
#[async_trait::async_trait]
pub trait SeenStore: Send + Sync {
    /// Existence check. Implementations must use the store's
    /// strong-consistency read mode: an eventually-consistent read
    /// reintroduces duplicate notifications across closely-spaced runs.
    async fn contains(&self, id: &str) -> Result<bool>;

    /// Write one chunk (at most [`BATCH_WRITE_LIMIT`] records). Returns the
    /// records the store rejected (throttling); the gateway retries those.
    async fn put(&self, records: &[SeenRecord]) -> Result<Vec<SeenRecord>>;
}

/// Chunking + retry over any [`SeenStore`]. Read and write failures are fatal
/// after retry exhaustion; losing dedup state silently would be worse than
/// a duplicate digest on the next run.
pub struct SeenGateway<'a> {
    store: &'a dyn SeenStore,
    retry: RetryPolicy,
}

impl<'a> SeenGateway<'a> {
    pub fn new(store: &'a dyn SeenStore, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Drop items whose id is already recorded. Store read errors are fatal.
    pub async fn filter_unseen(&self, items: Vec<Item>) -> Result<Vec<Item>> {
        let mut unseen = Vec::with_capacity(items.len());
        for item in items {
            let seen = self
                .retry
                .run("seen-store read", || async {
                    self.store
                        .contains(&item.id)
                        .await
                        .map_err(RetryError::Transient)
                })
                .await?;
            if seen {
                tracing::debug!(id = %item.id, "already notified, dropping");
            } else {
                unseen.push(item);
            }
        }
        Ok(unseen)
    }

    /// Persist one record per item, chunked to the store's batch limit.
    /// Partially rejected chunks shrink to the rejected remainder and are
    /// retried with backoff; exhaustion fails the run loudly.
    pub async fn mark_seen(&self, items: &[Item]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let records: Vec<SeenRecord> = items
            .iter()
            .map(|item| SeenRecord::from_item(item, now))
            .collect();

        for chunk in records.chunks(BATCH_WRITE_LIMIT) {
            let mut pending: Vec<SeenRecord> = chunk.to_vec();
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match self.store.put(&pending).await {
                    Ok(rejected) if rejected.is_empty() => break,
                    Ok(rejected) => {
                        tracing::warn!(
                            stage = "mark_seen",
                            rejected = rejected.len(),
                            attempt,
                            "store rejected part of a batch write"
                        );
                        pending = rejected;
                    }
                    Err(e) => {
                        tracing::warn!(stage = "mark_seen", attempt, error = ?e, "batch write failed");
                    }
                }
                if attempt >= self.retry.max_attempts {
                    bail!(
                        "seen-store write: retries exhausted, {} records unrecorded",
                        pending.len()
                    );
                }
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }
        Ok(())
    }
}

/// File-backed store for local runs: one JSON object mapping id to record.
/// Reads load the file on every call, which is as consistent as it gets.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<BTreeMap<String, SeenRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading seen store {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing seen store {}", self.path.display()))
    }

    fn save(&self, map: &BTreeMap<String, SeenRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let content = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("writing seen store {}", self.path.display()))
    }
}

#[async_trait::async_trait]
impl SeenStore for JsonFileStore {
    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.load()?.contains_key(id))
    }

    async fn put(&self, records: &[SeenRecord]) -> Result<Vec<SeenRecord>> {
        let mut map = self.load()?;
        for record in records {
            map.entry(record.id.clone()).or_insert_with(|| record.clone());
        }
        self.save(&map)?;
        Ok(Vec::new())
    }
}

/// In-memory store for tests and dry local runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<BTreeMap<String, SeenRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seen_ids<I: IntoIterator<Item = String>>(ids: I) -> Self {
        let store = Self::default();
        {
            let mut map = store.inner.lock().unwrap();
            for id in ids {
                map.insert(
                    id.clone(),
                    SeenRecord {
                        id,
                        source: "test".into(),
                        title: String::new(),
                        first_seen_at: Utc::now(),
                    },
                );
            }
        }
        store
    }

    pub fn records(&self) -> Vec<SeenRecord> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl SeenStore for MemoryStore {
    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().contains_key(id))
    }

    async fn put(&self, records: &[SeenRecord]) -> Result<Vec<SeenRecord>> {
        let mut map = self.inner.lock().unwrap();
        for record in records {
            map.entry(record.id.clone()).or_insert_with(|| record.clone());
        }
        Ok(Vec::new())
    }
}
