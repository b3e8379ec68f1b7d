//! TTL caches in front of the indexer and dashboard
//!
//! One generic [`TtlCache`] is instantiated per tier:
//! - criteria folder scans, keyed by site + unit folder + criteria folder (15 min)
//! - site dashboards, keyed by site id (1 hour)
//!
//! The log sheet table lives alongside them in [`CacheManager`] but is
//! never expired. A miss always recomputes the whole value; entries from
//! different scan generations are never merged.

use crate::config::CacheSettings;
use crate::dashboard::SiteDashboard;
use crate::error::Result;
use crate::logsheet::LogSheetAllocator;
use crate::types::EvidenceItem;
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A cached value and when it was stored
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub timestamp: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            timestamp: Instant::now(),
            ttl,
        }
    }

    /// Valid while `now - timestamp < ttl`
    pub fn is_valid(&self) -> bool {
        self.timestamp.elapsed() < self.ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries still within TTL
    pub live: usize,

    /// Entries stored, including stale ones awaiting replacement
    pub stored: usize,

    pub capacity: usize,
}

/// Bounded LRU cache whose entries expire after a fixed TTL
pub struct TtlCache<K: Hash + Eq, V> {
    name: &'static str,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    /// Per-key gates so only one recompute per key is in flight
    inflight: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            name,
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            inflight: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value if present and within TTL. Stale entries are not served.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().ok()?;
        entries
            .get(key)
            .filter(|entry| entry.is_valid())
            .map(|entry| entry.value.clone())
    }

    /// Store a value, replacing any previous entry for the key
    pub fn set(&self, key: K, value: V) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key, CacheEntry::new(value, self.ttl));
        }
    }

    pub fn invalidate(&self, key: &K) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(key);
        }
    }

    /// Drop every entry whose key matches
    pub fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) {
        if let Ok(mut entries) = self.entries.lock() {
            let doomed: Vec<K> = entries
                .iter()
                .filter(|(key, _)| predicate(key))
                .map(|(key, _)| key.clone())
                .collect();
            for key in doomed {
                entries.pop(&key);
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        match self.entries.lock() {
            Ok(entries) => CacheStats {
                live: entries.iter().filter(|(_, e)| e.is_valid()).count(),
                stored: entries.len(),
                capacity: entries.cap().get(),
            },
            Err(_) => CacheStats {
                live: 0,
                stored: 0,
                capacity: 0,
            },
        }
    }

    /// Return the cached value, or compute and store it.
    ///
    /// The flag is `true` on a hit. Concurrent misses for the same key wait
    /// for the first computation and then read its result. Errors are not
    /// cached.
    pub async fn get_or_try_compute<F, Fut>(&self, key: K, compute: F) -> Result<(V, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        self.get_or_try_compute_if(key, compute, |_| true).await
    }

    /// Like [`get_or_try_compute`](Self::get_or_try_compute), storing the
    /// computed value only when `should_store` accepts it.
    pub async fn get_or_try_compute_if<F, Fut, P>(
        &self,
        key: K,
        compute: F,
        should_store: P,
    ) -> Result<(V, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
        P: FnOnce(&V) -> bool,
    {
        if let Some(value) = self.get(&key) {
            debug!("{} cache hit for {:?}", self.name, key);
            return Ok((value, true));
        }

        let gate = self.gate(&key);
        let guard = gate.lock().await;

        if let Some(value) = self.get(&key) {
            debug!("{} cache filled while waiting for {:?}", self.name, key);
            drop(guard);
            self.release_gate(&key, &gate);
            return Ok((value, true));
        }

        debug!("{} cache miss for {:?}, recomputing", self.name, key);
        let outcome = compute().await;
        if let Ok(value) = &outcome {
            if should_store(value) {
                self.set(key.clone(), value.clone());
            }
        }

        drop(guard);
        self.release_gate(&key, &gate);
        outcome.map(|value| (value, false))
    }

    fn gate(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        match self.inflight.lock() {
            Ok(mut inflight) => Arc::clone(inflight.entry(key.clone()).or_default()),
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn release_gate(&self, key: &K, gate: &Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut inflight) = self.inflight.lock() {
            // Map entry plus the caller's handle: nobody else is waiting.
            if Arc::strong_count(gate) <= 2 {
                inflight.remove(key);
            }
        }
    }
}

/// Cache key for one criteria folder scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderKey {
    pub site: String,
    pub unit_folder: String,
    pub criteria_folder: String,
}

/// The engine's shared caches
pub struct CacheManager {
    pub folders: TtlCache<FolderKey, Vec<EvidenceItem>>,
    pub dashboards: TtlCache<String, SiteDashboard>,
    pub log_sheets: Arc<LogSheetAllocator>,
}

impl CacheManager {
    pub fn new(settings: &CacheSettings) -> Self {
        Self::with_allocator(settings, Arc::new(LogSheetAllocator::new()))
    }

    /// Share a log sheet allocator across cache managers
    pub fn with_allocator(settings: &CacheSettings, log_sheets: Arc<LogSheetAllocator>) -> Self {
        Self {
            folders: TtlCache::new(
                "folder",
                settings.max_entries,
                Duration::from_secs(settings.folder_ttl_secs),
            ),
            dashboards: TtlCache::new(
                "dashboard",
                settings.max_entries,
                Duration::from_secs(settings.dashboard_ttl_secs),
            ),
            log_sheets,
        }
    }

    /// Drop every scan result for a site. Log sheet numbers are kept.
    pub fn invalidate_site(&self, site: &str) {
        debug!("Invalidating cached scans for {}", site);
        self.folders.invalidate_where(|key| key.site == site);
        self.dashboards.invalidate(&site.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PortfolioError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", 8, Duration::from_secs(60));
        cache.set("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"a".to_string()), None);

        let stats = cache.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.stored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compute_once_within_ttl() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", 8, Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let compute = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<u32, PortfolioError>(7)
        };

        let (value, hit) = cache.get_or_try_compute("k".to_string(), compute).await.unwrap();
        assert_eq!((value, hit), (7, false));
        let (value, hit) = cache.get_or_try_compute("k".to_string(), compute).await.unwrap();
        assert_eq!((value, hit), (7, true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let (_, hit) = cache.get_or_try_compute("k".to_string(), compute).await.unwrap();
        assert!(!hit);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", 8, Duration::from_secs(60));
        let err = cache
            .get_or_try_compute("k".to_string(), || async {
                Err(PortfolioError::RemoteUnavailable("down".into()))
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[tokio::test]
    async fn test_store_predicate() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", 8, Duration::from_secs(60));
        let (value, _) = cache
            .get_or_try_compute_if("k".to_string(), || async { Ok(3) }, |v| *v > 5)
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_compute() {
        let cache: Arc<TtlCache<String, u32>> =
            Arc::new(TtlCache::new("test", 8, Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_compute("k".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok(42)
                    })
                    .await
                    .unwrap()
                    .0
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_where_and_lru_capacity() {
        let cache: TtlCache<FolderKey, u32> = TtlCache::new("folder", 2, Duration::from_secs(60));
        let key = |site: &str, folder: &str| FolderKey {
            site: site.to_string(),
            unit_folder: "netp3_01".to_string(),
            criteria_folder: folder.to_string(),
        };

        cache.set(key("a", "1_1"), 1);
        cache.set(key("b", "1_1"), 2);
        cache.invalidate_where(|k| k.site == "a");
        assert_eq!(cache.get(&key("a", "1_1")), None);
        assert_eq!(cache.get(&key("b", "1_1")), Some(2));

        cache.set(key("b", "1_2"), 3);
        cache.set(key("b", "1_3"), 4);
        assert_eq!(cache.stats().stored, 2);
        assert_eq!(cache.get(&key("b", "1_1")), None);
    }
}
