//! Durable caching of the interpreter binary.
//!
//! The binary is tens of megabytes, so it is persisted in a named cache
//! keyed by its download URL and only fetched from the network on a miss.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};
use crate::runner::config::RunnerConfig;
use crate::runner::fetch::BinaryFetcher;

/// A durable store for downloaded binaries, keyed by URL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up the bytes stored under `key`.
    async fn lookup(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store `bytes` under `key`, replacing any previous entry.
    async fn store(&self, key: &str, bytes: Bytes) -> Result<()>;

    /// Drop the entry under `key`. Removing a missing entry is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Where [`RuntimeBinaryCache`] found a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySource {
    /// Read back from the durable store.
    Cache,
    /// Downloaded.
    Network,
}

/// A named cache directory on disk.
///
/// Entries are files named by the SHA-256 of their key, so any URL maps to
/// a safe file name.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Open (creating if needed) the cache `name` under `root`.
    pub fn open(root: impl AsRef<Path>, name: &str) -> Result<Self> {
        let dir = root.as_ref().join(name);
        std::fs::create_dir_all(&dir).map_err(|e| {
            RunnerError::CacheUnavailable(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    /// Open the cache `name` under the platform cache directory.
    pub fn open_default(name: &str) -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "ruby-wasm-runner").ok_or_else(|| {
            RunnerError::CacheUnavailable("no cache directory for this platform".to_string())
        })?;
        Self::open(dirs.cache_dir(), name)
    }

    /// Open the cache described by `config`, or `None` when caching is disabled.
    pub fn from_config(config: &RunnerConfig) -> Result<Option<Self>> {
        if !config.cache_enabled {
            return Ok(None);
        }
        let cache = match &config.cache_dir {
            Some(root) => Self::open(root, &config.cache_name)?,
            None => Self::open_default(&config.cache_name)?,
        };
        Ok(Some(cache))
    }

    /// Directory holding the cache entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{:x}.bin", digest))
    }
}

#[async_trait]
impl CacheStore for DiskCache {
    async fn lookup(&self, key: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, key: &str, bytes: Bytes) -> Result<()> {
        let path = self.entry_path(key);
        // Readers only ever see complete entries.
        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// An in-process cache store.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an entry is cached.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn lookup(&self, key: &str) -> Result<Option<Bytes>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn store(&self, key: &str, bytes: Bytes) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Cache-first access to the interpreter binary.
#[derive(Clone)]
pub struct RuntimeBinaryCache {
    fetcher: Arc<dyn BinaryFetcher>,
    store: Option<Arc<dyn CacheStore>>,
}

impl std::fmt::Debug for RuntimeBinaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBinaryCache")
            .field("cached", &self.store.is_some())
            .finish()
    }
}

impl RuntimeBinaryCache {
    /// Create a binary cache backed by `store`.
    pub fn new(fetcher: Arc<dyn BinaryFetcher>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            fetcher,
            store: Some(store),
        }
    }

    /// Create a binary cache that always goes to the network.
    pub fn uncached(fetcher: Arc<dyn BinaryFetcher>) -> Self {
        Self {
            fetcher,
            store: None,
        }
    }

    /// Whether a durable store is attached.
    pub fn is_cached(&self) -> bool {
        self.store.is_some()
    }

    /// Fetch the binary at `url`, serving it from the store when present.
    pub async fn fetch_binary(&self, url: &str) -> Result<Bytes> {
        self.fetch_with_source(url).await.map(|(bytes, _)| bytes)
    }

    /// Like [`fetch_binary`](Self::fetch_binary), also reporting where the
    /// bytes came from.
    ///
    /// Store failures never fail the fetch: a failed lookup counts as a miss
    /// and the write-back after a network fetch is fire-and-forget.
    pub async fn fetch_with_source(&self, url: &str) -> Result<(Bytes, BinarySource)> {
        let Some(store) = &self.store else {
            let bytes = self.fetcher.fetch(url).await?;
            return Ok((bytes, BinarySource::Network));
        };

        match store.lookup(url).await {
            Ok(Some(bytes)) => {
                debug!(url, len = bytes.len(), "runtime binary served from cache");
                return Ok((bytes, BinarySource::Cache));
            }
            Ok(None) => debug!(url, "runtime binary not cached"),
            Err(e) => warn!(url, error = %e, "binary cache lookup failed, fetching from network"),
        }

        let bytes = self.download(url).await?;
        Ok((bytes, BinarySource::Network))
    }

    /// Drop any cached copy of `url` and download it again.
    ///
    /// Used when a cached binary turns out to be unusable.
    pub async fn refetch(&self, url: &str) -> Result<Bytes> {
        if let Some(store) = &self.store {
            match store.remove(url).await {
                Ok(()) => debug!(url, "evicted cached runtime binary"),
                Err(e) => warn!(url, error = %e, "failed to evict cached runtime binary"),
            }
        }
        self.download(url).await
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let bytes = self.fetcher.fetch(url).await?;

        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let key = url.to_string();
            let copy = bytes.clone();
            tokio::spawn(async move {
                match store.store(&key, copy).await {
                    Ok(()) => debug!(url = %key, "runtime binary cached"),
                    Err(e) => warn!(url = %key, error = %e, "failed to cache runtime binary"),
                }
            });
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const URL: &str = "https://example.test/ruby.wasm";

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BinaryFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RunnerError::fetch(url, "connection refused"));
            }
            Ok(Bytes::from_static(b"\0asm-bytes"))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn lookup(&self, _key: &str) -> Result<Option<Bytes>> {
            Err(RunnerError::CacheUnavailable("disabled".to_string()))
        }

        async fn store(&self, _key: &str, _bytes: Bytes) -> Result<()> {
            Err(RunnerError::CacheUnavailable("disabled".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(RunnerError::CacheUnavailable("disabled".to_string()))
        }
    }

    async fn wait_until_cached(store: &MemoryCache) {
        for _ in 0..100 {
            if store.contains(URL) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("binary was never written back to the cache");
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores() {
        let fetcher = Arc::new(CountingFetcher::default());
        let store = Arc::new(MemoryCache::new());
        let cache = RuntimeBinaryCache::new(fetcher.clone(), store.clone());

        let bytes = cache.fetch_binary(URL).await.unwrap();
        assert_eq!(&bytes[..], b"\0asm-bytes");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        wait_until_cached(&store).await;
    }

    #[tokio::test]
    async fn test_hit_skips_network() {
        let fetcher = Arc::new(CountingFetcher::default());
        let store = Arc::new(MemoryCache::new());
        store
            .store(URL, Bytes::from_static(b"cached"))
            .await
            .unwrap();
        let cache = RuntimeBinaryCache::new(fetcher.clone(), store);

        let bytes = cache.fetch_binary(URL).await.unwrap();
        assert_eq!(&bytes[..], b"cached");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broken_store_falls_back_to_network() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = RuntimeBinaryCache::new(fetcher.clone(), Arc::new(BrokenStore));

        let bytes = cache.fetch_binary(URL).await.unwrap();
        assert_eq!(&bytes[..], b"\0asm-bytes");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncached_always_fetches() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = RuntimeBinaryCache::uncached(fetcher.clone());
        assert!(!cache.is_cached());

        cache.fetch_binary(URL).await.unwrap();
        cache.fetch_binary(URL).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_network_failure_propagates() {
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..Default::default()
        });
        let store = Arc::new(MemoryCache::new());
        let cache = RuntimeBinaryCache::new(fetcher, store.clone());

        let err = cache.fetch_binary(URL).await.unwrap_err();
        assert!(err.is_fetch());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disk_cache_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = DiskCache::open(tmp.path(), "bins-v1").unwrap();
        assert!(cache.dir().ends_with("bins-v1"));

        assert!(cache.lookup(URL).await.unwrap().is_none());
        cache
            .store(URL, Bytes::from_static(b"module"))
            .await
            .unwrap();
        let stored = cache.lookup(URL).await.unwrap().unwrap();
        assert_eq!(&stored[..], b"module");

        // Reopening the same named cache sees the entry.
        let reopened = DiskCache::open(tmp.path(), "bins-v1").unwrap();
        assert!(reopened.lookup(URL).await.unwrap().is_some());
        assert!(reopened.lookup("https://other.test/x.wasm").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_source_is_reported() {
        let fetcher = Arc::new(CountingFetcher::default());
        let store = Arc::new(MemoryCache::new());
        let cache = RuntimeBinaryCache::new(fetcher.clone(), store.clone());

        let (_, source) = cache.fetch_with_source(URL).await.unwrap();
        assert_eq!(source, BinarySource::Network);
        wait_until_cached(&store).await;

        let (_, source) = cache.fetch_with_source(URL).await.unwrap();
        assert_eq!(source, BinarySource::Cache);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refetch_replaces_bad_entry() {
        let fetcher = Arc::new(CountingFetcher::default());
        let store = Arc::new(MemoryCache::new());
        store
            .store(URL, Bytes::from_static(b"truncated"))
            .await
            .unwrap();
        let cache = RuntimeBinaryCache::new(fetcher.clone(), store.clone());

        let bytes = cache.refetch(URL).await.unwrap();
        assert_eq!(&bytes[..], b"\0asm-bytes");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        for _ in 0..100 {
            if store.lookup(URL).await.unwrap().as_deref() == Some(&b"\0asm-bytes"[..]) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("refetched binary was never written back");
    }

    #[tokio::test]
    async fn test_refetch_survives_broken_store() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = RuntimeBinaryCache::new(fetcher.clone(), Arc::new(BrokenStore));

        cache.refetch(URL).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disk_cache_remove() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = DiskCache::open(tmp.path(), "bins-v1").unwrap();

        cache.remove(URL).await.unwrap();
        cache
            .store(URL, Bytes::from_static(b"module"))
            .await
            .unwrap();
        cache.remove(URL).await.unwrap();
        assert!(cache.lookup(URL).await.unwrap().is_none());
    }

    #[test]
    fn test_disabled_config_has_no_store() {
        let config = RunnerConfig::builder().cache_enabled(false).build();
        assert!(DiskCache::from_config(&config).unwrap().is_none());
    }
}
