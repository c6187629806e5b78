//! In-memory key/value storage implementation

use crate::error::Result;
use crate::storage::KvStore;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// In-memory key/value storage using a BTreeMap
///
/// Useful for:
/// - Testing
/// - Temporary repositories
/// - Hosts that persist elsewhere and hydrate on startup
///
/// Uses `Bytes` for reference-counted values with cheap cloning; cloning the
/// store shares the underlying map.
#[derive(Debug, Clone)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryKvStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_and_get() {
        let store = MemoryKvStore::new();

        store.put("key1", b"value1").await.unwrap();
        assert_eq!(
            store.get("key1").await.unwrap().as_deref(),
            Some(&b"value1"[..])
        );
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites() {
        let store = MemoryKvStore::new();

        store.put("key", b"one").await.unwrap();
        store.put("key", b"two").await.unwrap();
        assert_eq!(store.get("key").await.unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryKvStore::new();

        store.put("key", b"value").await.unwrap();
        store.delete("key").await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), None);

        // absent key is not an error
        store.delete("key").await.unwrap();
    }

    #[tokio::test]
    async fn list_by_prefix() {
        let store = MemoryKvStore::new();

        store.put("records/a/1", b"v1").await.unwrap();
        store.put("records/a/2", b"v2").await.unwrap();
        store.put("records/b/1", b"v3").await.unwrap();
        store.put("commits/x", b"v4").await.unwrap();

        let keys = store.list("records/a/").await.unwrap();
        assert_eq!(keys, vec!["records/a/1", "records/a/2"]);

        let all_records = store.list("records/").await.unwrap();
        assert_eq!(all_records.len(), 3);
    }

    #[tokio::test]
    async fn clone_shares_storage() {
        let store = MemoryKvStore::new();
        let other = store.clone();

        store.put("key", b"value").await.unwrap();
        assert_eq!(
            other.get("key").await.unwrap().as_deref(),
            Some(&b"value"[..])
        );
    }
}
