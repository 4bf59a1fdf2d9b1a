//! Response cache with TTL expiry.
//!
//! Entries are JSON payloads stamped with the time they were stored. Two
//! backends exist:
//! - [`MemoryStore`] for a single process
//! - [`SqliteStore`] for a cache file that survives restarts
//!
//! A broken store never fails a request; it degrades to a cache miss.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{CacheBackend, CacheConfig};
use crate::utils::time::now_millis;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key/value storage behind [`TtlCache`]. Timestamps are epoch milliseconds.
pub trait CacheStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<(String, i64)>>;
    fn store(&self, key: &str, payload: &str, stored_at: i64) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// Remove every key starting with `prefix`; returns how many went.
    fn remove_prefix(&self, prefix: &str) -> Result<usize>;
    /// Remove entries stored before `cutoff`; returns how many went.
    fn purge_older_than(&self, cutoff: i64) -> Result<usize>;
}

/// Hex SHA-256 of the `:`-joined parts.
pub fn cache_key(parts: &[&str]) -> String {
    hex::encode(Sha256::digest(parts.join(":").as_bytes()))
}

/// Typed JSON cache over a [`CacheStore`].
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn CacheStore>,
    ttl_ms: i64,
}

impl TtlCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl_ms: ttl.as_millis().min(i64::MAX as u128) as i64,
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryStore::new()), ttl)
    }

    /// Build the configured backend with the default TTL.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let ttl = Duration::from_secs(config.ttl_secs);
        let store: Arc<dyn CacheStore> = match config.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
            CacheBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
        };
        info!("Cache backend {:?}, ttl {:?}", config.backend, ttl);
        Ok(Self::new(store, ttl))
    }

    /// Same store, different lifetime.
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        Self::new(Arc::clone(&self.store), ttl)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.max(0) as u64)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_at(key, now_millis())
    }

    /// Value stored under `key` if it is younger than the TTL at `now_ms`.
    pub fn get_at<T: DeserializeOwned>(&self, key: &str, now_ms: i64) -> Option<T> {
        let (payload, stored_at) = match self.store.load(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read failed for {}: {:#}", key, e);
                return None;
            }
        };

        if now_ms - stored_at >= self.ttl_ms {
            debug!("Cache entry {} expired", key);
            return None;
        }

        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                self.invalidate(key);
                None
            }
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) {
        self.put_at(key, value, now_millis())
    }

    pub fn put_at<T: Serialize>(&self, key: &str, value: &T, now_ms: i64) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode cache entry {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.store.store(key, &payload, now_ms) {
            warn!("Cache write failed for {}: {:#}", key, e);
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!("Cache delete failed for {}: {:#}", key, e);
        }
    }

    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.store.remove_prefix(prefix).unwrap_or_else(|e| {
            warn!("Cache prefix delete failed for {}: {:#}", prefix, e);
            0
        })
    }

    /// Drop entries older than twice the TTL.
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(self.ttl_ms.saturating_mul(2));
        match self.store.purge_older_than(cutoff) {
            Ok(removed) => {
                if removed > 0 {
                    debug!("Purged {} expired cache entries", removed);
                }
                removed
            }
            Err(e) => {
                warn!("Cache purge failed: {:#}", e);
                0
            }
        }
    }
}
