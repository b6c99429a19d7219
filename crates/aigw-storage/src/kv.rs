use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Backend(err.to_string())
    }
}

/// Typed atomic K/V with TTLs. All values are strings; callers handle JSON.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;
    async fn incr(&self, key: &str) -> Result<i64, KvError>;
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

/// Redis-backed store used in production; the connection manager reconnects
/// on its own.
#[derive(Clone)]
pub struct RedisKv {
    manager: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(KvError::from)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(KvError::from)?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                conn.set_ex::<_, _, ()>(key, value, secs).await?;
            }
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError> {
        let mut conn = self.manager.clone();
        Ok(conn.incr(key, delta).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let mut conn = self.manager.clone();
        let secs: i64 = conn.ttl(key).await?;
        Ok((secs > 0).then(|| Duration::from_secs(secs as u64)))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        let mut iter = conn
            .scan_match::<String, String>(format!("{prefix}*"))
            .await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

#[derive(Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process store for tests and single-node setups without Redis. TTLs are
/// honoured lazily on access.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge(entries: &mut HashMap<String, MemoryEntry>, key: &str) {
        if let Some(entry) = entries.get(key)
            && let Some(expires_at) = entry.expires_at
            && expires_at <= Instant::now()
        {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        Self::purge(&mut entries, key);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.entries.lock().expect("kv lock poisoned").remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        Self::purge(&mut entries, key);
        let current = entries
            .get(key)
            .and_then(|entry| entry.value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        let expires_at = entries.get(key).and_then(|entry| entry.expires_at);
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        Self::purge(&mut entries, key);
        Ok(entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now())))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let entries = self.entries.lock().expect("kv lock poisoned");
        let now = Instant::now();
        Ok(entries
            .iter()
            .filter(|(key, entry)| {
                key.starts_with(prefix)
                    && entry.expires_at.map(|expires| expires > now).unwrap_or(true)
            })
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_counts_from_zero() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("auth:rr:m").await.unwrap(), 1);
        assert_eq!(kv.incr("auth:rr:m").await.unwrap(), 2);
        assert_eq!(kv.incr_by("auth:rr:m", 3).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn ttl_expires_values() {
        let kv = MemoryKv::new();
        kv.set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(kv.ttl("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert_eq!(kv.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_attaches_a_ttl_to_existing_keys() {
        let kv = MemoryKv::new();
        kv.set("k", "v", None).await.unwrap();
        assert_eq!(kv.ttl("k").await.unwrap(), None);
        kv.expire("k", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_filters_by_prefix() {
        let kv = MemoryKv::new();
        kv.set("quota:a:m:requests", "1", None).await.unwrap();
        kv.set("quota:a:m:tokens", "5", None).await.unwrap();
        kv.set("auth:rr:m", "2", None).await.unwrap();

        let mut keys = kv.scan("quota:a:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["quota:a:m:requests", "quota:a:m:tokens"]);
    }
}
