//! Backing-store abstraction.
//!
//! The queue is built from a handful of single-key atomic primitives (hash,
//! list, sorted set, set). Any store offering the same guarantees can back it;
//! there is deliberately no cross-key transaction in this interface.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::StoreResult;

#[cfg(any(test, feature = "test-util"))]
pub mod faulty;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

/// Atomic key-value primitives used by the queue components.
#[async_trait::async_trait]
pub trait Backend: Send + Sync + core::fmt::Debug {
    /// Set hash fields. With `ttl`, the key expiry is (re)set in the same
    /// pipeline; without it, any existing expiry is preserved.
    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// All fields of a hash; empty when the key does not exist.
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining time to live; `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    async fn del(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Append to the tail of a list, returning the new length.
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Pop from the head of the first non-empty list, checking `keys` in order.
    ///
    /// Waits up to `timeout` for an element; returns `(list_key, value)`.
    async fn blpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>>;

    async fn llen(&self, key: &str) -> StoreResult<u64>;

    /// Entire list contents, head first.
    async fn lrange(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Remove the first occurrence of `value`, returning how many were removed.
    async fn lrem(&self, key: &str, value: &str) -> StoreResult<u64>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Members with `score <= max`, lowest score first, at most `limit`.
    async fn zrange_by_score(&self, key: &str, max: f64, limit: usize) -> StoreResult<Vec<String>>;

    /// Remove a member; `true` only for the caller that actually removed it.
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn scard(&self, key: &str) -> StoreResult<u64>;

    /// Every live key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
