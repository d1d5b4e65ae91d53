// Named cache stores holding (request key -> response) entries, in memory or on disk.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::transport::HttpResponse;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            status: response.status.as_u16(),
            content_type: response.content_type().map(str::to_string),
            body: response.body.clone(),
        }
    }

    pub fn into_response(self) -> HttpResponse {
        let mut headers = HeaderMap::new();
        if let Some(value) = self
            .content_type
            .as_deref()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
        {
            headers.insert(CONTENT_TYPE, value);
        }
        HttpResponse {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.body,
        }
    }
}

/// Storage of named cache stores. Only the offline worker writes to it.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the named store if absent.
    async fn open(&self, name: &str) -> Result<(), StoreError>;
    async fn put(&self, name: &str, key: &str, response: CachedResponse) -> Result<(), StoreError>;
    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CachedResponse>, StoreError>;
    /// Names of all existing stores.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
    /// Remove a store and its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;
}

#[derive(Default)]
pub struct MemoryCacheStorage {
    stores: RwLock<BTreeMap<String, HashMap<String, CachedResponse>>>,
    fail_puts: AtomicBool,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Relaxed);
    }

    pub fn entry_count(&self, name: &str) -> usize {
        self.stores.read().get(name).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), StoreError> {
        self.stores.write().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn put(&self, name: &str, key: &str, response: CachedResponse) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("put rejected".to_string()));
        }
        self.stores
            .write()
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), response);
        Ok(())
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CachedResponse>, StoreError> {
        Ok(self
            .stores
            .read()
            .get(name)
            .and_then(|store| store.get(key))
            .cloned())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.stores.read().keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.stores.write().remove(name).is_some())
    }
}

#[derive(Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    content_type: Option<String>,
}

/// One directory per store under `root`; each entry is a body file plus a
/// metadata file. The metadata is written last and marks the entry complete.
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(urlencoding::encode(name).as_ref())
    }

    fn entry_paths(&self, name: &str, key: &str) -> (PathBuf, PathBuf) {
        let dir = self.store_dir(name);
        let stem = urlencoding::encode(key).into_owned();
        (
            dir.join(format!("{}.body", stem)),
            dir.join(format!("{}.meta.json", stem)),
        )
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(self.store_dir(name)).await?;
        Ok(())
    }

    async fn put(&self, name: &str, key: &str, response: CachedResponse) -> Result<(), StoreError> {
        self.open(name).await?;
        let (body_path, meta_path) = self.entry_paths(name, key);

        let meta = EntryMeta {
            key: key.to_string(),
            status: response.status,
            content_type: response.content_type,
        };
        let meta = serde_json::to_vec(&meta)
            .map_err(|e| StoreError::Corrupt(format!("serialize entry {}: {}", key, e)))?;

        tokio::fs::write(&body_path, &response.body).await?;
        let tmp = meta_path.with_extension("tmp");
        tokio::fs::write(&tmp, meta).await?;
        tokio::fs::rename(&tmp, &meta_path).await?;

        debug!(
            "cache put store={} key={} bytes={}",
            name,
            key,
            response.body.len()
        );
        Ok(())
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CachedResponse>, StoreError> {
        let (body_path, meta_path) = self.entry_paths(name, key);

        let meta = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let meta: EntryMeta = serde_json::from_slice(&meta)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", meta_path.display(), e)))?;

        let body = match tokio::fs::read(&body_path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Corrupt(format!(
                    "{} has metadata but no body",
                    meta.key
                )))
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        Ok(Some(CachedResponse {
            status: meta.status,
            content_type: meta.content_type,
            body: Bytes::from(body),
        }))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let raw = entry.file_name().to_string_lossy().into_owned();
            match urlencoding::decode(&raw) {
                Ok(name) => names.push(name.into_owned()),
                Err(_) => debug!("skipping undecodable cache dir {}", raw),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        match tokio::fs::remove_dir_all(self.store_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &'static str) -> CachedResponse {
        CachedResponse {
            status: 200,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[tokio::test]
    async fn test_memory_storage_stores_are_isolated() {
        let storage = MemoryCacheStorage::new();
        storage.put("a", "/x", page("a")).await.unwrap();
        storage.open("b").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["a", "b"]);
        assert!(storage.match_entry("b", "/x").await.unwrap().is_none());
        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_disk_storage_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path());

        assert!(storage.keys().await.unwrap().is_empty());

        storage
            .put("megamart-cache-v1", "/static/offline.html", page("<h1>offline</h1>"))
            .await
            .unwrap();
        storage.open("megamart-cache-v2").await.unwrap();

        let hit = storage
            .match_entry("megamart-cache-v1", "/static/offline.html")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit, page("<h1>offline</h1>"));
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["megamart-cache-v1", "megamart-cache-v2"]
        );

        assert!(storage.delete("megamart-cache-v1").await.unwrap());
        assert!(storage
            .match_entry("megamart-cache-v1", "/static/offline.html")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_disk_storage_rejects_corrupt_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.put("s", "/p", page("x")).await.unwrap();

        let (_, meta_path) = storage.entry_paths("s", "/p");
        std::fs::write(&meta_path, b"{broken").unwrap();
        assert!(matches!(
            storage.match_entry("s", "/p").await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_cached_response_restores_content_type() {
        let resp = page("hi").into_response();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.content_type(), Some("text/html; charset=utf-8"));
    }
}
