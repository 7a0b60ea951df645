// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Cache tier shared between gateway instances (e.g. Redis).
///
/// Values are JSON documents. Implementations must honor `ttl`; the cache
/// layer additionally checks the expiry stored inside each value.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`.
    async fn remove_prefix(&self, prefix: &str) -> Result<()>;
}

/// Process-local [`DistributedCache`], for development and tests.
#[derive(Default)]
pub struct InMemoryDistributedCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let expired = {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                None => return Ok(None),
                Some((value, expires_at)) if *expires_at > Instant::now() => {
                    return Ok(Some(value.clone()));
                }
                Some(_) => true,
            }
        };
        if expired {
            self.entries.write().unwrap().remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let cache = InMemoryDistributedCache::new();
        cache
            .set("content:p:a", "{}".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("content:p:a").await.unwrap().as_deref(), Some("{}"));
        cache.remove("content:p:a").await.unwrap();
        assert_eq!(cache.get("content:p:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_purged() {
        let cache = InMemoryDistributedCache::new();
        cache.set("k", "v".into(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_remove_prefix() {
        let cache = InMemoryDistributedCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("content:p:dir/a", "1".into(), ttl).await.unwrap();
        cache.set("content:p:dir/b", "2".into(), ttl).await.unwrap();
        cache.set("content:p:dir2", "3".into(), ttl).await.unwrap();
        cache.remove_prefix("content:p:dir/").await.unwrap();
        assert_eq!(cache.len(), 1);
    }
}
