use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};

use super::{alternative_key, check_key, join_url, FileStore, StorageError, StorageResult};

/// Stores payloads as plain files below `root`.
#[derive(Clone, Debug)]
pub struct LocalFileStore {
    root: PathBuf,
    base_url: String,
}

impl LocalFileStore {
    pub async fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(LocalFileStore {
            root,
            base_url: base_url.into(),
        })
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }

    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, key: &str, data: Vec<u8>) -> StorageResult<String> {
        let mut key = key.to_string();
        loop {
            let path = self.path_for(&key)?;
            Self::ensure_parent(&path).await?;

            // `create_new` keeps two uploads of the same name from clobbering
            // each other.
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&data).await?;
                    file.flush().await?;
                    return Ok(key);
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    key = alternative_key(&key, &mut rand::thread_rng());
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn open(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|error| match error.kind() {
            ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => error.into(),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        fs::remove_file(&path).await.map_err(|error| match error.kind() {
            ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => error.into(),
        })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn url(&self, key: &str) -> String {
        join_url(&self.base_url, key)
    }
}
