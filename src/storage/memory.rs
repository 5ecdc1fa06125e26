use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{alternative_key, check_key, join_url, FileStore, StorageError, StorageResult};

/// Keeps payloads in a map; used by the in-memory backend and tests.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
    base_url: String,
}

impl MemoryFileStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        MemoryFileStore {
            files: RwLock::default(),
            base_url: base_url.into(),
        }
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn save(&self, key: &str, data: Vec<u8>) -> StorageResult<String> {
        check_key(key)?;
        let mut files = self.files.write().await;
        let mut key = key.to_string();
        while files.contains_key(&key) {
            key = alternative_key(&key, &mut rand::thread_rng());
        }
        files.insert(key.clone(), data);
        Ok(key)
    }

    async fn open(&self, key: &str) -> StorageResult<Vec<u8>> {
        check_key(key)?;
        self.files
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        check_key(key)?;
        self.files
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        check_key(key)?;
        Ok(self.files.read().await.contains_key(key))
    }

    fn url(&self, key: &str) -> String {
        join_url(&self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_names_are_kept_apart() {
        let store = MemoryFileStore::new("/media");
        let first = store.save("a/b.txt", vec![1]).await.unwrap();
        let second = store.save("a/b.txt", vec![2]).await.unwrap();

        assert_eq!(first, "a/b.txt");
        assert_ne!(first, second);
        assert_eq!(store.len().await, 2);

        store.delete(&first).await.unwrap();
        assert!(!store.exists(&first).await.unwrap());
        assert!(matches!(
            store.open(&first).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
