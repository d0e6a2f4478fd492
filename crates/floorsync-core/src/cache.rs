//! TTL read cache for opt-in read paths
//!
//! Entries expire lazily: a read past the TTL returns nothing and evicts the
//! entry. The cache is independent from the pending queue.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::{self, KeyValueStore, CACHE_INDEX_KEY, CACHE_PREFIX};
use crate::util::now_ms;

/// Default entry lifetime (one hour)
pub const DEFAULT_TTL_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    data: Value,
    timestamp: i64,
    ttl: i64,
}

impl CacheEntry {
    const fn is_expired(&self, now: i64) -> bool {
        now.saturating_sub(self.timestamp) >= self.ttl
    }
}

/// Key-value read cache with per-entry TTL
pub struct ReadCache {
    store: Arc<dyn KeyValueStore>,
    default_ttl_ms: i64,
    index: Mutex<Vec<String>>,
    clock: fn() -> i64,
}

impl ReadCache {
    pub fn new(store: Arc<dyn KeyValueStore>, default_ttl_ms: i64) -> Result<Self> {
        let index: Vec<String> =
            store::load_json(store.as_ref(), CACHE_INDEX_KEY)?.unwrap_or_default();
        Ok(Self {
            store,
            default_ttl_ms,
            index: Mutex::new(index),
            clock: now_ms,
        })
    }

    /// Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Store a value under `key`, replacing any previous entry
    pub fn cache_data<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        ttl_ms: Option<i64>,
    ) -> Result<()> {
        let entry = CacheEntry {
            data: serde_json::to_value(data)?,
            timestamp: (self.clock)(),
            ttl: ttl_ms.unwrap_or(self.default_ttl_ms),
        };

        let mut index = self.index()?;
        store::save_json(self.store.as_ref(), &entry_key(key), &entry)?;
        if !index.iter().any(|known| known == key) {
            let mut next = index.clone();
            next.push(key.to_string());
            store::save_json(self.store.as_ref(), CACHE_INDEX_KEY, &next)?;
            *index = next;
        }
        Ok(())
    }

    /// Read a live entry; expired entries are evicted and read as `None`
    pub fn get_cached_data<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(entry) = store::load_json::<CacheEntry>(self.store.as_ref(), &entry_key(key))?
        else {
            return Ok(None);
        };

        if entry.is_expired((self.clock)()) {
            tracing::debug!("Cache entry '{key}' expired");
            let mut index = self.index()?;
            self.evict(&mut index, &[key.to_string()])?;
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(entry.data)?))
    }

    /// Remove every expired entry; returns how many were removed
    pub fn clear_expired(&self) -> Result<usize> {
        let now = (self.clock)();
        let mut index = self.index()?;

        let mut expired = Vec::new();
        for key in index.iter() {
            let entry = store::load_json::<CacheEntry>(self.store.as_ref(), &entry_key(key))?;
            if entry.map_or(true, |entry| entry.is_expired(now)) {
                expired.push(key.clone());
            }
        }

        self.evict(&mut index, &expired)?;
        Ok(expired.len())
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<usize> {
        let mut index = self.index()?;
        let keys = index.clone();
        self.evict(&mut index, &keys)?;
        Ok(keys.len())
    }

    /// Keys currently tracked, including entries that have expired but not been read
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.index()?.clone())
    }

    fn evict(&self, index: &mut Vec<String>, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        for key in keys {
            self.store.remove(&entry_key(key))?;
        }
        let next = index
            .iter()
            .filter(|known| !keys.contains(*known))
            .cloned()
            .collect::<Vec<_>>();
        store::save_json(self.store.as_ref(), CACHE_INDEX_KEY, &next)?;
        *index = next;
        Ok(())
    }

    fn index(&self) -> Result<MutexGuard<'_, Vec<String>>> {
        self.index
            .lock()
            .map_err(|_| Error::Persistence("cache index lock poisoned".into()))
    }
}

fn entry_key(key: &str) -> String {
    format!("{CACHE_PREFIX}{key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    static NOW: AtomicI64 = AtomicI64::new(0);

    fn fake_now() -> i64 {
        NOW.load(Ordering::SeqCst)
    }

    fn cache(store: Arc<dyn KeyValueStore>) -> ReadCache {
        ReadCache::new(store, 1_000).unwrap().with_clock(fake_now)
    }

    // The fake clock is shared, so every time-dependent case lives in one test.
    #[test]
    fn entries_expire_lazily_and_purge() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = cache(Arc::clone(&store));
        NOW.store(10_000, Ordering::SeqCst);

        cache
            .cache_data("machines", &json!([{"id": 1, "status": "running"}]), None)
            .unwrap();
        cache.cache_data("oee", &json!({"oee": 0.82}), Some(5_000)).unwrap();

        NOW.store(10_900, Ordering::SeqCst);
        let machines: Option<Value> = cache.get_cached_data("machines").unwrap();
        assert_eq!(machines, Some(json!([{"id": 1, "status": "running"}])));

        // Live strictly before `timestamp + ttl`
        NOW.store(11_000, Ordering::SeqCst);
        assert_eq!(cache.get_cached_data::<Value>("machines").unwrap(), None);
        assert!(store.get("floorsync.cache.machines").unwrap().is_none());
        assert_eq!(cache.keys().unwrap(), vec!["oee".to_string()]);

        NOW.store(14_999, Ordering::SeqCst);
        assert_eq!(cache.clear_expired().unwrap(), 0);
        NOW.store(15_000, Ordering::SeqCst);
        assert_eq!(cache.clear_expired().unwrap(), 1);
        assert!(cache.keys().unwrap().is_empty());
        assert_eq!(cache.clear_expired().unwrap(), 0);
    }

    #[test]
    fn rewriting_a_key_does_not_duplicate_the_index() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = ReadCache::new(Arc::clone(&store), DEFAULT_TTL_MS).unwrap();

        cache.cache_data("alerts", &json!([]), None).unwrap();
        cache.cache_data("alerts", &json!([1]), None).unwrap();

        assert_eq!(cache.keys().unwrap(), vec!["alerts".to_string()]);
        let alerts: Option<Vec<i32>> = cache.get_cached_data("alerts").unwrap();
        assert_eq!(alerts, Some(vec![1]));

        let reopened = ReadCache::new(store, DEFAULT_TTL_MS).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["alerts".to_string()]);
    }

    #[test]
    fn clear_removes_everything_but_the_queue() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set(crate::store::QUEUE_KEY, "[]").unwrap();
        let cache = ReadCache::new(Arc::clone(&store), DEFAULT_TTL_MS).unwrap();
        cache.cache_data("a", &1, None).unwrap();
        cache.cache_data("b", &2, None).unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.get_cached_data::<i32>("a").unwrap(), None);
        assert_eq!(
            store.get(crate::store::QUEUE_KEY).unwrap().as_deref(),
            Some("[]")
        );
    }

    #[test]
    fn missing_key_reads_as_none() {
        let cache = ReadCache::new(Arc::new(MemoryStore::new()), DEFAULT_TTL_MS).unwrap();
        assert_eq!(cache.get_cached_data::<Value>("nope").unwrap(), None);
    }
}
