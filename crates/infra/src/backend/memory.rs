//! In-memory backend for tests/dev and single-process deployments.
//!
//! Mirrors the store semantics the queue relies on: per-key expiry, empty
//! collections disappear, and blocked poppers are woken by pushes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::Backend;
use crate::error::{StoreError, StoreResult};

type Keyspace = HashMap<String, Entry>;

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_empty(&self) -> bool {
        match &self.value {
            Value::Hash(h) => h.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::SortedSet(z) => z.is_empty(),
            Value::Set(s) => s.is_empty(),
        }
    }
}

#[derive(Debug)]
enum Value {
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    SortedSet(HashMap<String, f64>),
    Set(HashSet<String>),
}

/// In-memory backend.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    keys: Mutex<Keyspace>,
    pushed: Notify,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn keys(&self) -> StoreResult<MutexGuard<'_, Keyspace>> {
        self.keys.lock().map_err(|_| StoreError::Poisoned)
    }

    fn try_pop(&self, lists: &[String]) -> StoreResult<Option<(String, String)>> {
        let mut keys = self.keys()?;
        for list in lists {
            let popped = match read(&mut keys, list) {
                None => None,
                Some(Value::List(_)) => match write(&mut keys, list, || Value::List(VecDeque::new())) {
                    Value::List(items) => items.pop_front(),
                    _ => None,
                },
                Some(_) => return Err(StoreError::WrongType(list.clone())),
            };
            drop_if_empty(&mut keys, list);
            if let Some(value) = popped {
                return Ok(Some((list.clone(), value)));
            }
        }
        Ok(None)
    }
}

fn purge(keys: &mut Keyspace, key: &str) {
    if keys.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        keys.remove(key);
    }
}

fn read<'a>(keys: &'a mut Keyspace, key: &str) -> Option<&'a Value> {
    purge(keys, key);
    keys.get(key).map(|e| &e.value)
}

fn write<'a>(keys: &'a mut Keyspace, key: &str, empty: impl FnOnce() -> Value) -> &'a mut Value {
    purge(keys, key);
    &mut keys
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(empty()))
        .value
}

fn drop_if_empty(keys: &mut Keyspace, key: &str) {
    if keys.get(key).is_some_and(Entry::is_empty) {
        keys.remove(key);
    }
}

fn wrong_type<T>(key: &str) -> StoreResult<T> {
    Err(StoreError::WrongType(key.to_string()))
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let mut keys = self.keys()?;
        let Value::Hash(hash) = write(&mut keys, key, || Value::Hash(HashMap::new())) else {
            return wrong_type(key);
        };
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        if let Some(ttl) = ttl {
            if let Some(entry) = keys.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        drop_if_empty(&mut keys, key);
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut keys = self.keys()?;
        match read(&mut keys, key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => wrong_type(key),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut keys = self.keys()?;
        purge(&mut keys, key);
        Ok(match keys.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut keys = self.keys()?;
        purge(&mut keys, key);
        Ok(keys
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut keys = self.keys()?;
        purge(&mut keys, key);
        Ok(keys.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut keys = self.keys()?;
        Ok(read(&mut keys, key).is_some())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let len = {
            let mut keys = self.keys()?;
            let Value::List(items) = write(&mut keys, key, || Value::List(VecDeque::new())) else {
                return wrong_type(key);
            };
            items.push_back(value.to_string());
            items.len() as u64
        };
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn blpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(hit) = self.try_pop(keys)? {
                return Ok(Some(hit));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut keys = self.keys()?;
        match read(&mut keys, key) {
            None => Ok(0),
            Some(Value::List(items)) => Ok(items.len() as u64),
            Some(_) => wrong_type(key),
        }
    }

    async fn lrange(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut keys = self.keys()?;
        match read(&mut keys, key) {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => Ok(items.iter().cloned().collect()),
            Some(_) => wrong_type(key),
        }
    }

    async fn lrem(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut keys = self.keys()?;
        let removed = match read(&mut keys, key) {
            None => 0,
            Some(Value::List(_)) => match write(&mut keys, key, || Value::List(VecDeque::new())) {
                Value::List(items) => match items.iter().position(|v| v == value) {
                    Some(idx) => {
                        items.remove(idx);
                        1
                    }
                    None => 0,
                },
                _ => 0,
            },
            Some(_) => return wrong_type(key),
        };
        drop_if_empty(&mut keys, key);
        Ok(removed)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut keys = self.keys()?;
        let Value::SortedSet(set) = write(&mut keys, key, || Value::SortedSet(HashMap::new()))
        else {
            return wrong_type(key);
        };
        set.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, max: f64, limit: usize) -> StoreResult<Vec<String>> {
        let mut keys = self.keys()?;
        match read(&mut keys, key) {
            None => Ok(Vec::new()),
            Some(Value::SortedSet(set)) => {
                let mut due: Vec<(&String, f64)> = set
                    .iter()
                    .filter(|(_, score)| **score <= max)
                    .map(|(member, score)| (member, *score))
                    .collect();
                due.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                Ok(due
                    .into_iter()
                    .take(limit)
                    .map(|(member, _)| member.clone())
                    .collect())
            }
            Some(_) => wrong_type(key),
        }
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut keys = self.keys()?;
        let removed = match read(&mut keys, key) {
            None => false,
            Some(Value::SortedSet(_)) => {
                match write(&mut keys, key, || Value::SortedSet(HashMap::new())) {
                    Value::SortedSet(set) => set.remove(member).is_some(),
                    _ => false,
                }
            }
            Some(_) => return wrong_type(key),
        };
        drop_if_empty(&mut keys, key);
        Ok(removed)
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let mut keys = self.keys()?;
        match read(&mut keys, key) {
            None => Ok(None),
            Some(Value::SortedSet(set)) => Ok(set.get(member).copied()),
            Some(_) => wrong_type(key),
        }
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut keys = self.keys()?;
        match read(&mut keys, key) {
            None => Ok(0),
            Some(Value::SortedSet(set)) => Ok(set.len() as u64),
            Some(_) => wrong_type(key),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut keys = self.keys()?;
        let Value::Set(set) = write(&mut keys, key, || Value::Set(HashSet::new())) else {
            return wrong_type(key);
        };
        set.insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut keys = self.keys()?;
        match read(&mut keys, key) {
            None => return Ok(()),
            Some(Value::Set(_)) => {
                if let Value::Set(set) = write(&mut keys, key, || Value::Set(HashSet::new())) {
                    set.remove(member);
                }
            }
            Some(_) => return wrong_type(key),
        }
        drop_if_empty(&mut keys, key);
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut keys = self.keys()?;
        match read(&mut keys, key) {
            None => Ok(false),
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(_) => wrong_type(key),
        }
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let mut keys = self.keys()?;
        match read(&mut keys, key) {
            None => Ok(0),
            Some(Value::Set(set)) => Ok(set.len() as u64),
            Some(_) => wrong_type(key),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = self.keys()?;
        let now = Instant::now();
        keys.retain(|_, entry| !entry.is_expired(now));
        let mut found: Vec<String> = keys
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        found.sort();
        Ok(found)
    }
}
