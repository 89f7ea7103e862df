//! Bounded caches used across the pipeline.
//!
//! Single-owner caches (segment dedup, synced files) are plain LRU maps. The
//! rendered-playlist cache is shared by concurrent HTTP requests.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use moka::future::Cache;

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

/// LRU map that reports the entry it pushed out, if any.
///
/// Re-inserting an existing key replaces its value without reporting an
/// eviction.
#[derive(Debug)]
pub struct EvictingLru<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
}

impl<K: Hash + Eq + Clone, V> EvictingLru<K, V> {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: LruCache::new(capacity(cap)),
        }
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        match self.inner.push(key.clone(), value) {
            Some((old_key, _)) if old_key == key => None,
            evicted => evicted,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Rendered {
    body: Bytes,
    rendered_at: Instant,
}

/// Time-range keyed cache of rendered playlists.
#[derive(Clone)]
pub struct RenderCache {
    entries: Cache<String, Rendered>,
    validity: Duration,
}

impl RenderCache {
    pub fn new(max_entries: usize, validity: Duration) -> Self {
        let mut builder = Cache::builder().max_capacity(max_entries.max(1) as u64);
        if !validity.is_zero() {
            builder = builder.time_to_live(validity);
        }
        Self {
            entries: builder.build(),
            validity,
        }
    }

    pub fn key(start: i64, end: i64) -> String {
        format!("{start}-{end}")
    }

    /// Returns the cached body while it is younger than the validity window.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let hit = self.entries.get(key).await?;
        if hit.rendered_at.elapsed() < self.validity {
            Some(hit.body)
        } else {
            self.entries.invalidate(key).await;
            None
        }
    }

    pub async fn insert(&self, key: String, body: Bytes) {
        if self.validity.is_zero() {
            return;
        }
        let entry = Rendered {
            body,
            rendered_at: Instant::now(),
        };
        self.entries.insert(key, entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicting_lru_reports_oldest_entry() {
        let mut lru = EvictingLru::new(2);
        assert_eq!(lru.insert("a", 1), None);
        assert_eq!(lru.insert("b", 2), None);
        assert_eq!(lru.get(&"a"), Some(&1));
        assert_eq!(lru.insert("c", 3), Some(("b", 2)));
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn evicting_lru_replacement_is_not_an_eviction() {
        let mut lru = EvictingLru::new(1);
        lru.insert("a", 1);
        assert_eq!(lru.insert("a", 2), None);
        assert_eq!(lru.get(&"a"), Some(&2));
    }

    #[tokio::test]
    async fn render_cache_hits_within_validity() {
        let cache = RenderCache::new(4, Duration::from_secs(60));
        let key = RenderCache::key(1000, 1060);
        assert_eq!(key, "1000-1060");
        cache.insert(key.clone(), Bytes::from_static(b"#EXTM3U\n")).await;
        assert_eq!(cache.get(&key).await, Some(Bytes::from_static(b"#EXTM3U\n")));
        assert_eq!(cache.get("1-2").await, None);
    }

    #[tokio::test]
    async fn render_cache_with_zero_validity_never_hits() {
        let cache = RenderCache::new(4, Duration::ZERO);
        cache.insert("1-2".to_string(), Bytes::from_static(b"x")).await;
        assert_eq!(cache.get("1-2").await, None);
    }

    #[tokio::test]
    async fn render_cache_expires() {
        let cache = RenderCache::new(4, Duration::from_millis(30));
        cache.insert("1-2".to_string(), Bytes::from_static(b"x")).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("1-2").await, None);
    }
}
