//! Cache store for snapshots of popular posts.
//!
//! Entries are plain string hashes. The cache is never authoritative: a missing
//! entry says nothing about a post's votes.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::errors::AppError;

/// Key-value hash writer.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Set `fields` on the hash stored at `key`, creating it if needed.
    async fn write_hash(&self, key: &str, fields: &[(&'static str, String)])
        -> Result<(), AppError>;
}

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis. The connection manager reconnects on its own after failures.
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn write_hash(
        &self,
        key: &str,
        fields: &[(&'static str, String)],
    ) -> Result<(), AppError> {
        let mut connection = self.connection.clone();
        let _: () = connection.hset_multiple(key, fields).await?;
        Ok(())
    }
}

/// In-process cache used when no Redis URL is configured.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<HashMap<String, String>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn write_hash(
        &self,
        key: &str,
        fields: &[(&'static str, String)],
    ) -> Result<(), AppError> {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_merges_fields() {
        let cache = MemoryCache::new();
        cache
            .write_hash("post:1", &[("title", "first".into()), ("currentVote", "UP".into())])
            .await
            .unwrap();
        cache
            .write_hash("post:1", &[("currentVote", "DOWN".into())])
            .await
            .unwrap();

        let entry = cache.get("post:1").unwrap();
        assert_eq!(entry["title"], "first");
        assert_eq!(entry["currentVote"], "DOWN");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("post:2").is_none());
    }
}
