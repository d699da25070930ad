//! Fault-injecting backend wrapper for tests.
//!
//! Delegates every call to an inner backend, except that a chosen operation
//! can be made to fail with [`StoreError::Connection`] a set number of times.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Backend;
use crate::error::{StoreError, StoreResult};

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Hset,
    Rpush,
    Blpop,
    Zadd,
    Zrem,
    Srem,
}

#[derive(Debug)]
pub struct FaultyBackend {
    inner: Arc<dyn Backend>,
    pending: Mutex<HashMap<Op, usize>>,
    injected: Mutex<HashMap<Op, usize>>,
}

impl FaultyBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            pending: Mutex::new(HashMap::new()),
            injected: Mutex::new(HashMap::new()),
        }
    }

    pub fn arc(inner: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Self::new(inner))
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: Op, times: usize) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending.entry(op).or_default() += times;
        }
    }

    /// How many failures of `op` were returned so far.
    pub fn injected(&self, op: Op) -> usize {
        self.injected
            .lock()
            .map(|injected| injected.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn check(&self, op: Op) -> StoreResult<()> {
        let fire = {
            let mut pending = self.pending.lock().map_err(|_| StoreError::Poisoned)?;
            match pending.get_mut(&op) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if !fire {
            return Ok(());
        }
        let mut injected = self.injected.lock().map_err(|_| StoreError::Poisoned)?;
        *injected.entry(op).or_default() += 1;
        Err(StoreError::Connection(format!("injected {op:?} failure")))
    }
}

#[async_trait::async_trait]
impl Backend for FaultyBackend {
    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.check(Op::Hset)?;
        self.inner.hset(key, fields, ttl).await
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.inner.del(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.check(Op::Rpush)?;
        self.inner.rpush(key, value).await
    }

    async fn blpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>> {
        self.check(Op::Blpop)?;
        self.inner.blpop(keys, timeout).await
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        self.inner.llen(key).await
    }

    async fn lrange(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.lrange(key).await
    }

    async fn lrem(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.inner.lrem(key, value).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.check(Op::Zadd)?;
        self.inner.zadd(key, member, score).await
    }

    async fn zrange_by_score(&self, key: &str, max: f64, limit: usize) -> StoreResult<Vec<String>> {
        self.inner.zrange_by_score(key, max, limit).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check(Op::Zrem)?;
        self.inner.zrem(key, member).await
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.inner.zscore(key, member).await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.inner.zcard(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        self.inner.sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check(Op::Srem)?;
        self.inner.srem(key, member).await
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.sismember(key, member).await
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        self.inner.scard(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.scan_prefix(prefix).await
    }
}
