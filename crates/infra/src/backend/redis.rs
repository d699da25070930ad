//! Redis-backed store.
//!
//! Regular commands share one multiplexed, auto-reconnecting connection.
//! `BLPOP` parks the connection it runs on, so blocking pops go through a
//! second, dedicated connection.

use std::collections::HashMap;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tracing::instrument;

use super::Backend;
use crate::error::StoreResult;

/// Keys examined per `SCAN` round trip.
const SCAN_BATCH: usize = 500;

pub struct RedisBackend {
    client: redis::Client,
    commands: ConnectionManager,
    blocking: Mutex<ConnectionManager>,
}

impl core::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect to Redis.
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    #[instrument(skip(redis_url), err)]
    pub async fn connect(redis_url: impl AsRef<str>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())?;
        let commands = ConnectionManager::new(client.clone()).await?;
        let blocking = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            client,
            commands,
            blocking: Mutex::new(blocking),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.commands.clone()
    }
}

/// Escape glob metacharacters so a key prefix matches literally in `SCAN MATCH`.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait::async_trait]
impl Backend for RedisBackend {
    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HSET").arg(key).arg(fields).ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
        }
        let () = pipe.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        Ok(redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut self.conn())
            .await?)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let remaining: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        // -2: missing key, -1: no expiry
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        Ok(redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn blpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>> {
        if timeout.is_zero() {
            // BLPOP 0 would block forever; poll each lane once instead.
            for key in keys {
                let popped: Option<String> = redis::cmd("LPOP")
                    .arg(key)
                    .query_async(&mut self.conn())
                    .await?;
                if let Some(value) = popped {
                    return Ok(Some((key.clone(), value)));
                }
            }
            return Ok(None);
        }

        let mut conn = self.blocking.lock().await;
        Ok(redis::cmd("BLPOP")
            .arg(keys)
            .arg(timeout.as_secs_f64())
            .query_async(&mut *conn)
            .await?)
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        Ok(redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn lrange(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn lrem(&self, key: &str, value: &str) -> StoreResult<u64> {
        Ok(redis::cmd("LREM")
            .arg(key)
            .arg(1)
            .arg(value)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, max: f64, limit: usize) -> StoreResult<Vec<String>> {
        Ok(redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let removed: u64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed > 0)
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        Ok(redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        Ok(redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let _: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let _: i64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        Ok(redis::cmd("SCARD")
            .arg(key)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = glob_escape(prefix);
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        found.sort();
        found.dedup();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_escape_matches_prefix_literally() {
        assert_eq!(glob_escape("task:"), "task:*");
        assert_eq!(glob_escape("a*b?:"), "a\\*b\\?:*");
    }

    #[test]
    fn millis_never_rounds_to_zero() {
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2_000);
    }
}
