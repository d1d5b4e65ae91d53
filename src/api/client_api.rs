use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::gateway::{RequestGateway, StorefrontApi};
use crate::session::{FileSecureStore, SecureStore, SessionManager, SessionState};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::worker::{CacheStorage, DiskCacheStorage, OfflineWorker, WorkerRegistry, WorkerState};

/// Everything a client shell needs, wired from one configuration.
pub struct ClientEngine {
    config: ClientConfig,
    session: Arc<SessionManager>,
    api: StorefrontApi,
    transport: Arc<dyn HttpTransport>,
    storage: Arc<dyn CacheStorage>,
    registry: Arc<WorkerRegistry>,
}

impl ClientEngine {
    /// Build the engine on the file-backed store, reqwest and the disk cache.
    pub fn new(config: ClientConfig) -> Result<Self> {
        reqwest::Url::parse(&config.base_url)
            .map_err(|e| anyhow!("invalid base_url {:?}: {}", config.base_url, e))?;

        let store: Arc<dyn SecureStore> = Arc::new(FileSecureStore::new(&config.credential_path));
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(config.request_timeout()));
        let storage: Arc<dyn CacheStorage> = Arc::new(DiskCacheStorage::new(&config.cache_dir));
        Ok(Self::with_parts(config, store, transport, storage))
    }

    /// Build the engine on caller-supplied backends.
    pub fn with_parts(
        config: ClientConfig,
        store: Arc<dyn SecureStore>,
        transport: Arc<dyn HttpTransport>,
        storage: Arc<dyn CacheStorage>,
    ) -> Self {
        let session = Arc::new(SessionManager::new(store));
        let gateway = Arc::new(RequestGateway::new(
            config.base_url.clone(),
            transport.clone(),
            session.clone(),
        ));
        Self {
            api: StorefrontApi::new(gateway),
            session,
            transport,
            storage,
            registry: Arc::new(WorkerRegistry::new()),
            config,
        }
    }

    /// Restore the session and, when a token was found, fetch the profile.
    /// A failed profile call keeps the session authenticated-pending.
    pub async fn startup(&self) -> SessionState {
        let state = self.session.restore().await;
        let credential = match state.credential() {
            Some(credential) => credential.clone(),
            None => return state,
        };

        match self.api.profile().await {
            Ok(identity) => {
                if self.session.set_identity(&credential, identity) {
                    info!("profile loaded after restore");
                }
            }
            Err(e) => warn!("profile fetch after restore failed: {}", e),
        }
        self.session.state()
    }

    /// Exchange email/password for a token and start the session. Any failure
    /// leaves the session as it was and writes no credential.
    pub async fn sign_in(&self, email: &str, password: &str) -> ClientResult<()> {
        let reply = self.api.login(email, password).await?;
        self.session.login(reply.access_token, reply.user).await
    }

    pub async fn sign_out(&self) -> ClientResult<()> {
        self.session.logout().await
    }

    /// Register the configured offline worker version.
    pub async fn install_offline_worker(&self) -> ClientResult<WorkerState> {
        let worker = Arc::new(OfflineWorker::from_config(
            &self.config,
            self.storage.clone(),
            self.transport.clone(),
        ));
        self.registry.register(worker).await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn api(&self) -> &StorefrontApi {
        &self.api
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AUTH_TOKEN_KEY;
    use crate::error::TransportError;
    use crate::session::{Identity, MemorySecureStore};
    use crate::transport::{HttpRequest, HttpResponse};
    use crate::worker::MemoryCacheStorage;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;
    use serde_json::json;
    use tokio::sync::Notify;

    struct StaticPages;

    /// Holds `/api/auth/me` until released; answers with the first user's profile.
    #[derive(Default)]
    struct HeldProfile {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl HttpTransport for HeldProfile {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            if request.url.ends_with("/api/auth/me") {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(HttpResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from_static(br#"{"id": 1, "email": "old@user"}"#),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for StaticPages {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from(request.url),
            })
        }
    }

    #[test]
    fn test_rejects_unparseable_base_url() {
        let config = ClientConfig {
            base_url: "not a url".to_string(),
            ..ClientConfig::default()
        };
        assert!(ClientEngine::new(config).is_err());
    }

    #[tokio::test]
    async fn test_install_offline_worker_from_config() {
        let config = ClientConfig {
            base_url: "http://shop.test/".to_string(),
            cache_version: "v7".to_string(),
            ..ClientConfig::default()
        };
        let storage = Arc::new(MemoryCacheStorage::new());
        let engine = ClientEngine::with_parts(
            config,
            Arc::new(MemorySecureStore::new()),
            Arc::new(StaticPages),
            storage.clone(),
        );

        assert_eq!(
            engine.install_offline_worker().await.unwrap(),
            WorkerState::Active
        );
        assert_eq!(engine.registry().active_version().as_deref(), Some("v7"));
        assert_eq!(storage.entry_count("megamart-cache-v7"), 1);
    }

    #[tokio::test]
    async fn test_startup_without_token_skips_profile() {
        let engine = ClientEngine::with_parts(
            ClientConfig::default(),
            Arc::new(MemorySecureStore::new()),
            Arc::new(StaticPages),
            Arc::new(MemoryCacheStorage::new()),
        );
        assert_eq!(engine.startup().await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_late_profile_does_not_attach_to_newer_login() {
        let store = Arc::new(MemorySecureStore::new());
        store.insert_raw(AUTH_TOKEN_KEY, "tokA");
        let transport = Arc::new(HeldProfile::default());
        let engine = ClientEngine::with_parts(
            ClientConfig::default(),
            store,
            transport.clone(),
            Arc::new(MemoryCacheStorage::new()),
        );

        let relogin = async {
            transport.entered.notified().await;
            engine
                .session()
                .login("tokB", Identity::new(json!({"id": 2, "email": "new@user"})))
                .await
                .unwrap();
            transport.release.notify_one();
        };
        let (state, ()) = tokio::join!(engine.startup(), relogin);

        assert_eq!(state.credential().unwrap().as_str(), "tokB");
        let identity = engine.session().identity().unwrap();
        assert_eq!(identity.get("email").unwrap(), "new@user");
    }
}
