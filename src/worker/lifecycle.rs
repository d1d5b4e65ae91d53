// Worker state machine: Installing → Installed → Activating → Active, or Redundant.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::cache::{CacheStorage, CachedResponse};
use super::clients::Clients;
use super::stats::{FetchStats, FetchStatsSnapshot};
use crate::config::{ClientConfig, CACHE_NAME_PREFIX, NAVIGATION_FETCH_TIMEOUT_SECS, OFFLINE_URL};
use crate::error::{ClientError, ClientResult};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

const OFFLINE_PLACEHOLDER: &str =
    "<!doctype html><html><head><title>Offline</title></head><body><h1>You are offline</h1></body></html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Installed,
    Activating,
    Active,
    /// Failed to install, or superseded by a newer version.
    Redundant,
}

impl WorkerState {
    pub fn name(self) -> &'static str {
        match self {
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Top-level page load.
    Navigate,
    SameOrigin,
    NoCors,
    Cors,
}

#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: HttpRequest,
    pub mode: RequestMode,
}

impl FetchEvent {
    pub fn new(request: HttpRequest, mode: RequestMode) -> Self {
        Self { request, mode }
    }

    pub fn navigation(url: impl Into<String>) -> Self {
        Self::new(HttpRequest::get(url), RequestMode::Navigate)
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the caller forwards the request itself.
    Passthrough(HttpRequest),
    /// Live network response, whatever its status.
    Network(HttpResponse),
    /// Network unreachable; the offline page.
    Fallback(HttpResponse),
}

impl FetchOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, FetchOutcome::Fallback(_))
    }
}

pub struct OfflineWorker {
    version: String,
    cache_name: String,
    origin: String,
    fallback_path: String,
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn HttpTransport>,
    fetch_timeout: Duration,
    skip_waiting_on_install: bool,
    skip_waiting: AtomicBool,
    state: RwLock<WorkerState>,
    stats: FetchStats,
}

impl OfflineWorker {
    /// A worker for `version` fetching its fallback page from `origin`.
    pub fn new(
        version: impl Into<String>,
        origin: impl Into<String>,
        storage: Arc<dyn CacheStorage>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let version = version.into();
        Self {
            cache_name: format!("{}{}", CACHE_NAME_PREFIX, version),
            version,
            origin: origin.into().trim_end_matches('/').to_string(),
            fallback_path: OFFLINE_URL.to_string(),
            storage,
            transport,
            fetch_timeout: Duration::from_secs(NAVIGATION_FETCH_TIMEOUT_SECS),
            skip_waiting_on_install: true,
            skip_waiting: AtomicBool::new(false),
            state: RwLock::new(WorkerState::Installing),
            stats: FetchStats::new(),
        }
    }

    pub fn from_config(
        config: &ClientConfig,
        storage: Arc<dyn CacheStorage>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self::new(config.cache_version.clone(), config.base_url.clone(), storage, transport)
            .with_fallback_path(config.offline_url.clone())
            .with_fetch_timeout(config.navigation_timeout())
            .with_skip_waiting(config.skip_waiting)
    }

    pub fn with_fallback_path(mut self, path: impl Into<String>) -> Self {
        self.fallback_path = path.into();
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Whether `on_install` requests skip-waiting.
    pub fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting_on_install = skip;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn stats(&self) -> FetchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Let this worker activate without waiting for open clients to close.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Relaxed);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Relaxed)
    }

    fn fallback_url(&self) -> String {
        format!("{}{}", self.origin, self.fallback_path)
    }

    fn set_state(&self, next: WorkerState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            info!("worker {} {} -> {}", self.version, prev, next);
        }
    }

    fn expect_state(&self, expected: WorkerState) -> ClientResult<()> {
        let found = self.state();
        if found != expected {
            return Err(ClientError::InvalidState {
                version: self.version.clone(),
                expected: expected.name(),
                found: found.name(),
            });
        }
        Ok(())
    }

    pub(crate) fn mark_redundant(&self) {
        self.set_state(WorkerState::Redundant);
    }

    /// Pre-cache the fallback page. On failure this version becomes redundant
    /// and whatever version is active keeps serving.
    pub async fn on_install(&self) -> ClientResult<()> {
        self.expect_state(WorkerState::Installing)?;
        if self.skip_waiting_on_install {
            self.skip_waiting();
        }

        match self.precache_fallback().await {
            Ok(()) => {
                self.set_state(WorkerState::Installed);
                Ok(())
            }
            Err(reason) => {
                warn!("worker {} install failed: {}", self.version, reason);
                self.set_state(WorkerState::Redundant);
                Err(ClientError::Installation {
                    version: self.version.clone(),
                    reason,
                })
            }
        }
    }

    async fn precache_fallback(&self) -> Result<(), String> {
        let url = self.fallback_url();
        let response = timeout(self.fetch_timeout, self.transport.execute(HttpRequest::get(&url)))
            .await
            .map_err(|_| format!("fetching {} timed out after {:?}", url, self.fetch_timeout))?
            .map_err(|e| format!("fetching {} failed: {}", url, e))?;

        if !response.status.is_success() {
            return Err(format!(
                "fetching {} returned HTTP {}",
                url,
                response.status.as_u16()
            ));
        }

        let existed = self
            .storage
            .keys()
            .await
            .map_err(|e| format!("listing cache stores failed: {}", e))?
            .iter()
            .any(|name| *name == self.cache_name);

        let stored = async {
            self.storage.open(&self.cache_name).await?;
            self.storage
                .put(
                    &self.cache_name,
                    &self.fallback_path,
                    CachedResponse::from_response(&response),
                )
                .await
        }
        .await;

        if let Err(e) = stored {
            if !existed {
                if let Err(cleanup) = self.storage.delete(&self.cache_name).await {
                    debug!("removing partial store {} failed: {}", self.cache_name, cleanup);
                }
            }
            return Err(format!("storing fallback in {} failed: {}", self.cache_name, e));
        }

        debug!(
            "worker {} cached {} bytes={}",
            self.version,
            self.fallback_path,
            response.body.len()
        );
        Ok(())
    }

    /// Claim open clients and purge the cache stores of every other version.
    /// Names without the cache prefix are not ours and are left alone.
    /// Returns the names of the purged stores.
    pub async fn on_activate(&self, clients: &Clients) -> ClientResult<Vec<String>> {
        self.expect_state(WorkerState::Installed)?;
        self.set_state(WorkerState::Activating);

        let claimed = clients.claim(&self.version);
        debug!("worker {} claimed {} client(s)", self.version, claimed);

        let mut purged = Vec::new();
        match self.storage.keys().await {
            Ok(names) => {
                let stale = names
                    .into_iter()
                    .filter(|n| n.starts_with(CACHE_NAME_PREFIX) && *n != self.cache_name);
                for name in stale {
                    match self.storage.delete(&name).await {
                        Ok(_) => purged.push(name),
                        Err(e) => warn!("purging stale cache store {} failed: {}", name, e),
                    }
                }
            }
            Err(e) => warn!("listing cache stores during activation failed: {}", e),
        }
        if !purged.is_empty() {
            info!("worker {} purged stale stores {:?}", self.version, purged);
        }

        self.set_state(WorkerState::Active);
        Ok(purged)
    }

    /// Network first for navigations, falling back to the cached offline page.
    /// Everything else is passed through untouched.
    pub async fn on_fetch(&self, event: FetchEvent) -> FetchOutcome {
        if !event.is_navigation() || self.state() != WorkerState::Active {
            self.stats.record_passthrough();
            return FetchOutcome::Passthrough(event.request);
        }
        self.stats.record_navigation();

        let url = event.request.url.clone();
        match timeout(self.fetch_timeout, self.transport.execute(event.request)).await {
            Ok(Ok(response)) => {
                self.stats.record_network();
                FetchOutcome::Network(response)
            }
            Ok(Err(e)) => {
                debug!("navigation {} failed, serving fallback: {}", url, e);
                self.serve_fallback().await
            }
            Err(_) => {
                warn!(
                    "navigation {} timed out after {:?}, serving fallback",
                    url, self.fetch_timeout
                );
                self.serve_fallback().await
            }
        }
    }

    async fn serve_fallback(&self) -> FetchOutcome {
        match self
            .storage
            .match_entry(&self.cache_name, &self.fallback_path)
            .await
        {
            Ok(Some(cached)) => {
                self.stats.record_fallback(true);
                FetchOutcome::Fallback(cached.into_response())
            }
            Ok(None) => {
                warn!("fallback {} missing from {}", self.fallback_path, self.cache_name);
                self.stats.record_fallback(false);
                FetchOutcome::Fallback(offline_placeholder())
            }
            Err(e) => {
                warn!("reading fallback from {} failed: {}", self.cache_name, e);
                self.stats.record_fallback(false);
                FetchOutcome::Fallback(offline_placeholder())
            }
        }
    }
}

fn offline_placeholder() -> HttpResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    HttpResponse {
        status: StatusCode::SERVICE_UNAVAILABLE,
        headers,
        body: Bytes::from_static(OFFLINE_PLACEHOLDER.as_bytes()),
    }
}
