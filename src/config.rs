use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Durable key holding the bearer credential.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Prefix shared by every versioned cache store name.
pub const CACHE_NAME_PREFIX: &str = "megamart-cache-";

/// Path of the page served when a navigation cannot reach the network.
pub const OFFLINE_URL: &str = "/static/offline.html";

/// Version tag used when the configuration does not name one.
pub const DEFAULT_CACHE_VERSION: &str = "v1";

/// Upper bound on a navigation fetch before the fallback page is served.
pub const NAVIGATION_FETCH_TIMEOUT_SECS: u64 = 10;

/// Upper bound on a single API request through the transport.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Path prefix of the backend's JSON API.
pub const API_PREFIX: &str = "/api";

/// Largest request body the local server forwards upstream (16 MB).
pub const MAX_FORWARDED_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Top-level configuration for the client engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend origin, e.g. `http://10.0.2.2:8000`.
    pub base_url: String,
    /// File backing the durable credential store.
    pub credential_path: String,
    /// Root directory of the on-disk cache storage.
    pub cache_dir: String,
    /// Version tag of the offline cache store.
    pub cache_version: String,
    /// Path of the fallback page, relative to `base_url`.
    pub offline_url: String,
    pub navigation_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Activate a freshly installed worker without waiting for open pages to close.
    pub skip_waiting: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            credential_path: "secure_store.json".to_string(),
            cache_dir: "offline_cache".to_string(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            offline_url: OFFLINE_URL.to_string(),
            navigation_timeout_secs: NAVIGATION_FETCH_TIMEOUT_SECS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            skip_waiting: true,
        }
    }
}

impl ClientConfig {
    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow!("failed to read config {}: {}", path.as_ref().display(), e)
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.cache_version.trim().is_empty() {
            return Err(anyhow!("cache_version must not be empty"));
        }
        if self.cache_version.contains('/') {
            return Err(anyhow!(
                "cache_version {:?} must not contain '/'",
                self.cache_version
            ));
        }
        if !self.offline_url.starts_with('/') {
            return Err(anyhow!(
                "offline_url {:?} must be an absolute path",
                self.offline_url
            ));
        }
        Ok(())
    }

    /// Name of the cache store owned by the configured worker version.
    pub fn cache_name(&self) -> String {
        format!("{}{}", CACHE_NAME_PREFIX, self.cache_version)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
