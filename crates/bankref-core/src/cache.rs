use crate::clock::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Default validity window for cached reference data.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// The shared cache instance: opaque JSON payloads under string keys, so bank
/// resolutions and assignment listings share one eviction domain.
pub type RefDataCache = TtlCache<serde_json::Value>;

struct CacheEntry<V> {
    data: V,
    stored_at: DateTime<Utc>,
}

/// Staleness-bounded key/value cache.
///
/// Expiry is checked lazily on read; there is no background eviction. The map
/// is mutex-guarded so the cache is safe under a multithreaded runtime, but it
/// makes no coherence promise against concurrent store writes. The whole
/// structure is disposable: dropping every entry costs latency, never
/// correctness.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_CACHE_TTL.as_secs() as i64));
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        // A poisoned lock only means a panic mid-insert elsewhere; the map
        // itself stays usable.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Value stored under `key` no more than TTL ago, evicting it if expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if now - entry.stored_at < self.ttl => Some(entry.data.clone()),
            Some(_) => {
                entries.remove(key);
                debug!(key, "cache entry expired");
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        let entry = CacheEntry {
            data: value,
            stored_at: self.clock.now(),
        };
        self.lock().insert(key.into(), entry);
    }

    /// Evict every key containing `pattern` as a substring; with `None`,
    /// evict everything.
    pub fn invalidate(&self, pattern: Option<&str>) {
        let mut entries = self.lock();
        match pattern {
            Some(pattern) => {
                let before = entries.len();
                entries.retain(|key, _| !key.contains(pattern));
                debug!(pattern, evicted = before - entries.len(), "cache eviction");
            }
            None => {
                let evicted = entries.len();
                entries.clear();
                debug!(evicted, "cache cleared");
            }
        }
    }

    pub fn clear(&self) {
        self.invalidate(None);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ManualClock;
    use super::*;
    use chrono::TimeZone;

    fn cache_with_clock() -> (TtlCache<String>, Arc<ManualClock>) {
        let start = Utc.timestamp_opt(1_736_000_000, 0).single().unwrap();
        let clock = Arc::new(ManualClock::at(start));
        let cache = TtlCache::new(DEFAULT_CACHE_TTL, clock.clone());
        (cache, clock)
    }

    #[test]
    fn read_within_ttl_hits() {
        let (cache, clock) = cache_with_clock();
        cache.set("banks:b1", "v".to_string());

        clock.advance(chrono::Duration::seconds(299));
        assert_eq!(cache.get("banks:b1").as_deref(), Some("v"));
    }

    #[test]
    fn read_past_ttl_misses_and_evicts() {
        let (cache, clock) = cache_with_clock();
        cache.set("banks:b1", "v".to_string());

        clock.advance(chrono::Duration::seconds(301));
        assert_eq!(cache.get("banks:b1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn substring_invalidation_is_scoped() {
        let (cache, _clock) = cache_with_clock();
        cache.set("banks:b1,b2", "a".to_string());
        cache.set("banks:active", "b".to_string());
        cache.set("assignments:e1", "c".to_string());

        cache.invalidate(Some("banks:"));
        assert_eq!(cache.get("banks:b1,b2"), None);
        assert_eq!(cache.get("banks:active"), None);
        assert_eq!(cache.get("assignments:e1").as_deref(), Some("c"));
    }

    #[test]
    fn clear_evicts_everything() {
        let (cache, _clock) = cache_with_clock();
        cache.set("banks:b1", "a".to_string());
        cache.set("assignments:e1", "b".to_string());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn overwrite_refreshes_timestamp() {
        let (cache, clock) = cache_with_clock();
        cache.set("banks:b1", "old".to_string());

        clock.advance(chrono::Duration::seconds(200));
        cache.set("banks:b1", "new".to_string());

        clock.advance(chrono::Duration::seconds(200));
        assert_eq!(cache.get("banks:b1").as_deref(), Some("new"));
    }
}
