//! Key-value cache primitive backing the spending-plan store.
//!
//! The store only needs `get`/`set`/`delete`, key enumeration, and an atomic
//! `increment`. Backends without a native increment get one for free from
//! the default implementation, which loops over [`CacheStore::compare_and_set`]
//! until the swap succeeds.

mod local;

pub use local::LocalCache;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Upper bound on compare-and-set retries in the emulated increment.
pub(crate) const MAX_INCREMENT_CONFLICTS: usize = 1_000;

/// Errors raised by cache backends.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The stored value is not an integer and cannot be incremented.
    #[error("value at key '{0}' is not an integer")]
    NotAnInteger(String),

    /// Too many concurrent writers kept winning the compare-and-set race.
    #[error("increment of key '{0}' kept conflicting with concurrent writers")]
    Contention(String),

    /// A value could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// A shared key-value store with optional per-key expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the value stored at `key`, if any and not expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store `value` at `key`. `None` means the entry never expires.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove `key`. Returns whether something was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// List keys matching a glob pattern where `*` matches any run of characters.
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Replace the value at `key` with `new` only if the current value equals
    /// `expected` (`None` meaning "absent"). Returns whether the swap happened.
    ///
    /// With `ttl == None` an existing entry keeps its expiry and a new entry
    /// never expires.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<bool> {
        self.compare_and_set(key, None, value, ttl).await
    }

    /// Atomically add `delta` to the integer at `key` and return the new value.
    ///
    /// A missing key counts as zero and is created with `ttl`. An existing
    /// key keeps its expiry.
    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> CacheResult<i64> {
        for _ in 0..MAX_INCREMENT_CONFLICTS {
            let current = self.get(key).await?;
            let base = match &current {
                Some(value) => value
                    .as_i64()
                    .ok_or_else(|| CacheError::NotAnInteger(key.to_string()))?,
                None => 0,
            };
            let next = base + delta;
            // Only the creating writer sets the expiry; later swaps keep it.
            let swap_ttl = if current.is_none() { ttl } else { None };
            if self
                .compare_and_set(key, current.as_ref(), Value::from(next), swap_ttl)
                .await?
            {
                return Ok(next);
            }
        }
        Err(CacheError::Contention(key.to_string()))
    }
}

/// Match `key` against a glob pattern supporting `*` wildcards only.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    let first = parts[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    let last = parts[parts.len() - 1];
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
