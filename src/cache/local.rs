//! In-process cache backed by a sharded concurrent map.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::{glob_match, CacheError, CacheResult, CacheStore};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Local TTL cache.
///
/// Mutations of a single key run under that key's shard lock, so
/// [`CacheStore::increment`] is a native atomic operation here rather than
/// the compare-and-set loop the trait provides by default.
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl LocalCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }
}

#[async_trait]
impl CacheStore for LocalCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()> {
        self.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = !occupied.get().is_expired(now);
                let matches = match (live, expected) {
                    (true, Some(expected)) => &occupied.get().value == expected,
                    (false, None) => true,
                    _ => false,
                };
                if !matches {
                    return Ok(false);
                }
                let expires_at = match ttl {
                    Some(ttl) => Some(now + ttl),
                    None if live => occupied.get().expires_at,
                    None => None,
                };
                occupied.insert(CacheEntry {
                    value: new,
                    expires_at,
                });
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(CacheEntry::new(new, ttl));
                Ok(true)
            }
        }
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> CacheResult<i64> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(CacheEntry::new(Value::from(delta), ttl));
                    return Ok(delta);
                }
                let current = occupied
                    .get()
                    .value
                    .as_i64()
                    .ok_or_else(|| CacheError::NotAnInteger(key.to_string()))?;
                let next = current + delta;
                occupied.get_mut().value = Value::from(next);
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(Value::from(delta), ttl));
                Ok(delta)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = LocalCache::new();
        cache.set("a", json!({"x": 1}), None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(json!({"x": 1})));
        assert!(cache.delete("a").await.unwrap());
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert!(!cache.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let cache = LocalCache::new();
        cache
            .set("short", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        cache.set("long", json!(2), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.keys("*").await.unwrap(), vec!["long".to_string()]);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_increment_creates_and_adds() {
        let cache = LocalCache::new();
        assert_eq!(cache.increment("n", 5, None).await.unwrap(), 5);
        assert_eq!(cache.increment("n", 7, None).await.unwrap(), 12);
        assert_eq!(cache.get("n").await.unwrap(), Some(json!(12)));
    }

    #[tokio::test]
    async fn test_increment_rejects_non_integer() {
        let cache = LocalCache::new();
        cache.set("s", json!("text"), None).await.unwrap();
        let err = cache.increment("s", 1, None).await.unwrap_err();
        assert!(matches!(err, CacheError::NotAnInteger(_)));
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let cache = LocalCache::new();
        assert!(cache.compare_and_set("k", None, json!(1), None).await.unwrap());
        assert!(!cache.compare_and_set("k", None, json!(2), None).await.unwrap());
        assert!(!cache
            .compare_and_set("k", Some(&json!(5)), json!(2), None)
            .await
            .unwrap());
        assert!(cache
            .compare_and_set("k", Some(&json!(1)), json!(2), None)
            .await
            .unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let cache = LocalCache::new();
        assert!(cache.set_if_absent("k", json!("first"), None).await.unwrap());
        assert!(!cache.set_if_absent("k", json!("second"), None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("first")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_do_not_lose_updates() {
        let cache = LocalCache::new();
        let mut handles = Vec::new();
        for _ in 0..64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.increment("counter", 3, None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.get("counter").await.unwrap(), Some(json!(192)));
    }

    /// Cache that only exposes the trait's default increment.
    struct CasOnly(LocalCache);

    #[async_trait]
    impl CacheStore for CasOnly {
        async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()> {
            self.0.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> CacheResult<bool> {
            self.0.delete(key).await
        }
        async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
            self.0.keys(pattern).await
        }
        async fn compare_and_set(
            &self,
            key: &str,
            expected: Option<&Value>,
            new: Value,
            ttl: Option<Duration>,
        ) -> CacheResult<bool> {
            self.0.compare_and_set(key, expected, new, ttl).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_emulated_increment_is_atomic() {
        let cache = Arc::new(CasOnly(LocalCache::new()));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.increment("counter", 2, None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.get("counter").await.unwrap(), Some(json!(100)));
    }
}
