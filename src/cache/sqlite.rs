//! SQLite-backed cache file.

use super::CacheStore;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the cache database, creating parent directories.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open cache database at {:?}", path))?;
        let store = Self::with_connection(conn)?;

        info!("Cache database opened at {:?}", path);
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_stored_at ON cache_entries(stored_at);
            "#,
        )
        .context("Failed to initialize cache schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("cache connection lock poisoned"))
    }
}

impl CacheStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<(String, i64)>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT payload, stored_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    fn store(&self, key: &str, payload: &str, stored_at: i64) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO cache_entries (key, payload, stored_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, stored_at = excluded.stored_at
            "#,
            params![key, payload, stored_at],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        // substr avoids LIKE wildcard escaping
        let removed = self.conn()?.execute(
            "DELETE FROM cache_entries WHERE substr(key, 1, ?1) = ?2",
            params![prefix.chars().count() as i64, prefix],
        )?;
        Ok(removed)
    }

    fn purge_older_than(&self, cutoff: i64) -> Result<usize> {
        let removed = self.conn()?.execute(
            "DELETE FROM cache_entries WHERE stored_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.store("a:history", "{\"x\":1}", 42).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.load("a:history").unwrap(),
            Some(("{\"x\":1}".to_string(), 42))
        );
    }

    #[test]
    fn test_prefix_with_like_wildcards() {
        let store = SqliteStore::in_memory().unwrap();
        store.store("ab_%:one", "1", 0).unwrap();
        store.store("abcd:two", "2", 0).unwrap();

        assert_eq!(store.remove_prefix("ab_%").unwrap(), 1);
        assert!(store.load("abcd:two").unwrap().is_some());
    }

    #[test]
    fn test_ttl_cache_over_sqlite() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cache = TtlCache::new(store.clone(), Duration::from_secs(60));

        cache.put_at("k", &vec!["a".to_string()], 0);
        cache.put_at("k", &vec!["b".to_string()], 10_000);
        assert_eq!(cache.get_at::<Vec<String>>("k", 20_000), Some(vec!["b".to_string()]));

        cache.put_at("stale", &1, -200_000);
        assert_eq!(cache.purge_expired(10_000), 1);
        assert_eq!(store.purge_older_than(i64::MAX).unwrap(), 1);
    }
}
