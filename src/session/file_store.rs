// File-backed secure store: a single JSON object, rewritten atomically via rename.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::store::SecureStore;
use crate::error::StoreError;

pub struct FileSecureStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSecureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", self.path.display(), e)))
    }

    /// Read for modification. A corrupt file is replaced rather than blocking
    /// writes; the flag reports that the file must be rewritten.
    async fn read_map_for_write(&self) -> Result<(BTreeMap<String, String>, bool), StoreError> {
        match self.read_map().await {
            Ok(map) => Ok((map, false)),
            Err(StoreError::Corrupt(reason)) => {
                warn!("discarding corrupt secure store: {}", reason);
                Ok((BTreeMap::new(), true))
            }
            Err(e) => Err(e),
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec(map)
            .map_err(|e| StoreError::Corrupt(format!("serialize: {}", e)))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("secure store written path={} keys={}", self.path.display(), map.len());
        Ok(())
    }
}

#[async_trait]
impl SecureStore for FileSecureStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_map().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let (mut map, _) = self.read_map_for_write().await?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let (mut map, corrupt) = self.read_map_for_write().await?;
        if map.remove(key).is_none() && !corrupt {
            return Ok(());
        }
        self.write_map(&map).await
    }
}
