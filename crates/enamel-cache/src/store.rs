//! Named cache buckets with optional disk persistence
//!
//! Each bucket is persisted as one bincode file under the storage root. Writes
//! and the eviction that follows them happen under the bucket lock, so a
//! bucket never holds more than its bound once a write returns.

use crate::error::{CacheError, Result};
use crate::request::{Response, StoredResponse};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Byte accounting shared by every bucket of a storage
#[derive(Debug)]
struct Quota {
    /// `u64::MAX` when unlimited
    limit: AtomicU64,
    used: AtomicU64,
}

impl Quota {
    fn unlimited() -> Self {
        Self {
            limit: AtomicU64::new(u64::MAX),
            used: AtomicU64::new(0),
        }
    }

    /// Account for replacing `old` bytes with `new` bytes
    fn reserve(&self, old: u64, new: u64) -> Result<()> {
        let limit = self.limit.load(Ordering::Acquire);
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let next = used.saturating_sub(old).saturating_add(new);
                (new <= old || next <= limit).then_some(next)
            })
            .map(|_| ())
            .map_err(|used| CacheError::QuotaExceeded {
                needed: new.saturating_sub(old),
                available: limit.saturating_sub(used),
            })
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

/// Bucket statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Entries currently held
    pub entries: usize,
    /// Approximate bytes held
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to respect the bound
    pub evictions: u64,
}

impl StoreStats {
    /// Hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct StoreStatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    size: u64,
    response: Response,
}

impl Entry {
    /// Eviction rank, oldest first; unstamped entries count as oldest
    fn rank(&self) -> (u64, u64) {
        (self.response.cache_time().unwrap_or(0), self.seq)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
    bytes: u64,
    dirty: bool,
}

impl StoreInner {
    fn ranked_keys(&self) -> Vec<String> {
        let mut ranked: Vec<_> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.rank(), key))
            .collect();
        ranked.sort();
        ranked.into_iter().map(|(_, key)| key.clone()).collect()
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.bytes = self.bytes.saturating_sub(entry.size);
        self.dirty = true;
        Some(entry)
    }
}

/// On-disk form of a bucket
#[derive(Serialize, Deserialize)]
struct PersistedStore {
    name: String,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    seq: u64,
    response: StoredResponse,
}

/// A single named bucket of request/response pairs
#[derive(Debug)]
pub struct CacheStore {
    name: String,
    inner: Mutex<StoreInner>,
    quota: Arc<Quota>,
    stats: StoreStatsInner,
}

impl CacheStore {
    fn new(name: String, quota: Arc<Quota>) -> Self {
        Self {
            name,
            inner: Mutex::new(StoreInner::default()),
            quota,
            stats: StoreStatsInner::default(),
        }
    }

    fn restore(persisted: PersistedStore, quota: Arc<Quota>) -> Self {
        let mut inner = StoreInner::default();
        for entry in persisted.entries {
            let response = Response::from(entry.response);
            let size = response.size();
            inner.next_seq = inner.next_seq.max(entry.seq + 1);
            inner.bytes += size;
            inner.entries.insert(
                entry.key,
                Entry {
                    seq: entry.seq,
                    size,
                    response,
                },
            );
        }
        quota.used.fetch_add(inner.bytes, Ordering::AcqRel);

        Self {
            name: persisted.name,
            inner: Mutex::new(inner),
            quota,
            stats: StoreStatsInner::default(),
        }
    }

    /// Bucket name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a stored response
    pub async fn lookup(&self, key: &str) -> Option<Response> {
        let inner = self.inner.lock().await;
        match inner.entries.get(key) {
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.response.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a response without bounding the bucket
    pub async fn put(&self, key: &str, response: Response) -> Result<()> {
        self.put_bounded(key, response, usize::MAX).await.map(|_| ())
    }

    /// Store a response, then evict the oldest entries beyond `max_entries`
    ///
    /// Returns the evicted keys.
    pub async fn put_bounded(
        &self,
        key: &str,
        response: Response,
        max_entries: usize,
    ) -> Result<Vec<String>> {
        let size = response.size();
        let mut inner = self.inner.lock().await;

        let seq = inner.next_seq;
        let old = inner.entries.get(key).map(|e| e.size).unwrap_or(0);
        let count = inner.entries.len() + usize::from(!inner.entries.contains_key(key));
        let excess = count.saturating_sub(max_entries.max(1));

        // Pick victims as if the write had happened, so the quota is checked
        // against what the bucket holds once trimmed.
        let victims: Vec<(String, u64)> = if excess == 0 {
            Vec::new()
        } else {
            let mut ranked: Vec<((u64, u64), &str, u64)> = inner
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, e)| (e.rank(), k.as_str(), e.size))
                .collect();
            ranked.push(((response.cache_time().unwrap_or(0), seq), key, size));
            ranked.sort();
            ranked
                .into_iter()
                .take(excess)
                .map(|(_, k, s)| (k.to_string(), s))
                .collect()
        };
        let keeps_new = !victims.iter().any(|(k, _)| k == key);
        let freed: u64 = victims
            .iter()
            .filter(|(k, _)| k != key)
            .map(|(_, s)| *s)
            .sum();
        self.quota
            .reserve(old + freed, if keeps_new { size } else { 0 })?;

        inner.next_seq += 1;
        inner.bytes = inner.bytes.saturating_sub(old) + size;
        inner.entries.insert(key.to_string(), Entry { seq, size, response });
        inner.dirty = true;

        if victims.is_empty() {
            return Ok(Vec::new());
        }

        // quota already accounts for these removals
        let mut evicted = Vec::with_capacity(victims.len());
        for (victim, _) in victims {
            if inner.remove(&victim).is_some() {
                evicted.push(victim);
            }
        }
        self.stats
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        debug!(bucket = %self.name, evicted = evicted.len(), "Trimmed bucket");

        Ok(evicted)
    }

    /// Remove an entry
    pub async fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.remove(key) {
            Some(entry) => {
                self.quota.release(entry.size);
                true
            }
            None => false,
        }
    }

    /// Keys in eviction order, oldest first
    pub async fn keys(&self) -> Vec<String> {
        self.inner.lock().await.ranked_keys()
    }

    /// Whether a key is stored
    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.entries.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get bucket statistics
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().await;
        StoreStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    async fn bytes(&self) -> u64 {
        self.inner.lock().await.bytes
    }

    fn snapshot(&self, inner: &StoreInner) -> PersistedStore {
        let mut entries: Vec<PersistedEntry> = inner
            .entries
            .iter()
            .map(|(key, entry)| PersistedEntry {
                key: key.clone(),
                seq: entry.seq,
                response: StoredResponse::from(&entry.response),
            })
            .collect();
        entries.sort_by_key(|e| e.seq);
        PersistedStore {
            name: self.name.clone(),
            entries,
        }
    }

    /// Write the bucket to `path` if it changed since the last write
    async fn persist(&self, path: &Path) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.dirty {
            return Ok(false);
        }

        let data = bincode::serialize(&self.snapshot(&inner))?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &data).await?;
        fs::rename(&tmp_path, path).await?;

        inner.dirty = false;
        Ok(true)
    }
}

/// Collection of named buckets
#[derive(Debug)]
pub struct CacheStorage {
    root: Option<PathBuf>,
    stores: DashMap<String, Arc<CacheStore>>,
    quota: Arc<Quota>,
}

impl CacheStorage {
    /// Storage that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            root: None,
            stores: DashMap::new(),
            quota: Arc::new(Quota::unlimited()),
        }
    }

    /// Create or open a storage directory
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let storage = Self {
            root: Some(root.clone()),
            stores: DashMap::new(),
            quota: Arc::new(Quota::unlimited()),
        };

        let mut dir = fs::read_dir(&root).await?;
        while let Some(file) = dir.next_entry().await? {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let data = fs::read(&path).await?;
            match bincode::deserialize::<PersistedStore>(&data) {
                Ok(persisted) => {
                    let store = CacheStore::restore(persisted, storage.quota.clone());
                    storage
                        .stores
                        .insert(store.name.clone(), Arc::new(store));
                }
                Err(e) => warn!(path = %path.display(), "Skipping unreadable bucket: {}", e),
            }
        }

        info!(
            "Opened cache storage: {} buckets, {} bytes",
            storage.stores.len(),
            storage.used_bytes()
        );

        Ok(storage)
    }

    /// Limit the total bytes held across all buckets
    pub fn with_quota(self, bytes: u64) -> Self {
        self.quota.limit.store(bytes, Ordering::Release);
        self
    }

    /// Open a bucket, creating it if needed
    pub fn open_store(&self, name: &str) -> Arc<CacheStore> {
        self.stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CacheStore::new(name.to_string(), self.quota.clone())))
            .clone()
    }

    /// Get an existing bucket
    pub fn get(&self, name: &str) -> Option<Arc<CacheStore>> {
        self.stores.get(name).map(|s| s.value().clone())
    }

    /// Whether a bucket exists
    pub fn has(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    /// All bucket names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    /// Delete a bucket and its persisted file
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let Some((_, store)) = self.stores.remove(name) else {
            return Ok(false);
        };
        self.quota.release(store.bytes().await);

        if let Some(path) = self.store_path(name) {
            if fs::try_exists(&path).await? {
                fs::remove_file(&path).await?;
            }
        }
        Ok(true)
    }

    /// Bytes held across all buckets
    pub fn used_bytes(&self) -> u64 {
        self.quota.used.load(Ordering::Acquire)
    }

    /// Persist changed buckets
    pub async fn sync(&self) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        fs::create_dir_all(root).await?;

        let stores: Vec<Arc<CacheStore>> = self.stores.iter().map(|s| s.value().clone()).collect();
        for store in stores {
            let path = root.join(file_name(store.name()));
            if store.persist(&path).await? {
                debug!(bucket = %store.name(), "Persisted bucket");
            }
        }
        Ok(())
    }

    fn store_path(&self, name: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(file_name(name)))
    }
}

impl Drop for CacheStorage {
    fn drop(&mut self) {
        // Best effort sync on drop
        let Some(root) = &self.root else {
            return;
        };
        for store in self.stores.iter() {
            let Ok(inner) = store.inner.try_lock() else {
                continue;
            };
            if !inner.dirty {
                continue;
            }
            if let Ok(data) = bincode::serialize(&store.snapshot(&inner)) {
                let path = root.join(file_name(store.name()));
                let tmp_path = path.with_extension("tmp");
                if std::fs::write(&tmp_path, &data).is_ok() {
                    let _ = std::fs::rename(&tmp_path, &path);
                }
            }
        }
    }
}

/// File name for a bucket; characters outside `[A-Za-z0-9._-]` are replaced
fn file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.bin", safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped(body: &str, at: u64) -> Response {
        Response::ok(body.to_string()).stamped(at)
    }

    #[tokio::test]
    async fn test_lookup_and_stats() {
        let storage = CacheStorage::in_memory();
        let store = storage.open_store("v1-static");

        assert!(store.lookup("/app.js").await.is_none());
        store.put("/app.js", stamped("js", 10)).await.unwrap();
        let hit = store.lookup("/app.js").await.unwrap();
        assert_eq!(hit.text(), "js");

        let stats = store.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_bounded_put_evicts_oldest() {
        let storage = CacheStorage::in_memory();
        let store = storage.open_store("v1-api");

        store.put_bounded("a", stamped("a", 100), 2).await.unwrap();
        store.put_bounded("b", stamped("b", 200), 2).await.unwrap();
        let evicted = store.put_bounded("c", stamped("c", 300), 2).await.unwrap();

        assert_eq!(evicted, vec!["a".to_string()]);
        assert_eq!(store.keys().await, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(store.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_same_timestamp_falls_back_to_insertion_order() {
        let storage = CacheStorage::in_memory();
        let store = storage.open_store("v1-api");

        for key in ["x", "y", "z"] {
            store.put_bounded(key, stamped(key, 500), 2).await.unwrap();
        }
        assert_eq!(store.keys().await, vec!["y".to_string(), "z".to_string()]);
    }

    #[tokio::test]
    async fn test_unstamped_entries_go_first() {
        let storage = CacheStorage::in_memory();
        let store = storage.open_store("v1-critical");

        store.put("stamped", stamped("s", 100)).await.unwrap();
        store.put("bare", Response::ok("b")).await.unwrap();
        assert_eq!(store.keys().await[0], "bare");
    }

    #[tokio::test]
    async fn test_overwrite_keeps_one_entry() {
        let storage = CacheStorage::in_memory();
        let store = storage.open_store("v1-images");

        store.put("k", stamped("old", 1)).await.unwrap();
        store.put("k", stamped("new", 2)).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.lookup("k").await.unwrap().text(), "new");
    }

    #[tokio::test]
    async fn test_quota_rejects_write() {
        let storage = CacheStorage::in_memory().with_quota(64);
        let store = storage.open_store("v1-images");

        store.put("small", Response::ok("tiny")).await.unwrap();
        let err = store
            .put("big", Response::ok(vec![0u8; 128]))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { .. }));
        assert!(!store.contains("big").await);

        assert!(store.delete("small").await);
        assert_eq!(storage.used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_quota_counts_bytes_freed_by_eviction() {
        let storage = CacheStorage::in_memory().with_quota(100);
        let store = storage.open_store("v1-images");

        store.put_bounded("a", Response::ok(vec![1u8; 40]), 2).await.unwrap();
        store.put_bounded("b", Response::ok(vec![2u8; 40]), 2).await.unwrap();
        let evicted = store
            .put_bounded("c", Response::ok(vec![3u8; 40]), 2)
            .await
            .unwrap();
        assert_eq!(evicted, vec!["a".to_string()]);
        assert_eq!(storage.used_bytes(), 80);

        // still too big after trimming: nothing changes
        let err = store
            .put_bounded("d", Response::ok(vec![4u8; 90]), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { .. }));
        assert_eq!(store.keys().await, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(storage.used_bytes(), 80);
    }

    #[tokio::test]
    async fn test_delete_bucket() {
        let storage = CacheStorage::in_memory();
        storage.open_store("old-v0-api").put("k", Response::ok("v")).await.unwrap();
        storage.open_store("v1-api");

        assert_eq!(storage.names(), vec!["old-v0-api".to_string(), "v1-api".to_string()]);
        assert!(storage.delete("old-v0-api").await.unwrap());
        assert!(!storage.delete("old-v0-api").await.unwrap());
        assert!(!storage.has("old-v0-api"));
        assert_eq!(storage.used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = CacheStorage::open(dir.path()).await.unwrap();
            let store = storage.open_store("v1/static");
            store.put("a", stamped("a", 1)).await.unwrap();
            store.put("b", stamped("b", 2)).await.unwrap();
            storage.sync().await.unwrap();
        }
        assert!(dir.path().join("v1_static.bin").exists());

        let storage = CacheStorage::open(dir.path()).await.unwrap();
        let store = storage.get("v1/static").unwrap();
        assert_eq!(store.keys().await, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.lookup("b").await.unwrap().cache_time(), Some(2));

        // insertion order continues after a reload
        store.put_bounded("c", stamped("c", 2), 2).await.unwrap();
        assert_eq!(store.keys().await, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_deleted_bucket_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::open(dir.path()).await.unwrap();
        storage.open_store("gone").put("k", Response::ok("v")).await.unwrap();
        storage.sync().await.unwrap();
        assert!(dir.path().join("gone.bin").exists());

        storage.delete("gone").await.unwrap();
        assert!(!dir.path().join("gone.bin").exists());
    }
}
