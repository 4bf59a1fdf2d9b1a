use super::CacheStore;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (String, i64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("cache lock poisoned")
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<(String, i64)>> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn store(&self, key: &str, payload: &str, stored_at: i64) -> Result<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), (payload.to_string(), stored_at));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    fn purge_older_than(&self, cutoff: i64) -> Result<usize> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, (_, stored_at)| *stored_at >= cutoff);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_prefix_only_touches_matching_keys() {
        let store = MemoryStore::new();
        store.store("user-a:history", "1", 0).unwrap();
        store.store("user-a:fees", "2", 0).unwrap();
        store.store("user-b:history", "3", 0).unwrap();

        assert_eq!(store.remove_prefix("user-a:").unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.load("user-b:history").unwrap().is_some());
    }

    #[test]
    fn test_store_overwrites_timestamp() {
        let store = MemoryStore::new();
        store.store("k", "old", 1).unwrap();
        store.store("k", "new", 2).unwrap();
        assert_eq!(store.load("k").unwrap(), Some(("new".to_string(), 2)));

        store.remove("k").unwrap();
        assert!(store.is_empty());
    }
}
