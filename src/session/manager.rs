// Session state machine: Unknown until restored, then Authenticated or Anonymous.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::SecureStore;
use crate::config::AUTH_TOKEN_KEY;
use crate::error::{ClientError, ClientResult, StoreError};
use crate::gateway::CredentialSource;

/// Opaque bearer token. Always non-empty and safe to place in a header.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> ClientResult<Self> {
        let token = token.into();
        if !Self::is_header_safe(&token) {
            return Err(ClientError::InvalidCredential);
        }
        Ok(Self(token))
    }

    fn is_header_safe(token: &str) -> bool {
        !token.is_empty() && token.bytes().all(|b| b.is_ascii_graphic())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// User descriptor returned by the backend. Held in memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(serde_json::Value);

impl Identity {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unknown,
    /// `identity` is `None` after a restore until the profile has been fetched.
    Authenticated {
        credential: Credential,
        identity: Option<Identity>,
    },
    Anonymous,
}

impl SessionState {
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            SessionState::Authenticated { credential, .. } => Some(credential),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Authenticated { .. } => "authenticated",
            SessionState::Anonymous => "anonymous",
        }
    }
}

pub struct SessionManager {
    store: Arc<dyn SecureStore>,
    state: RwLock<SessionState>,
    /// Serializes restore/login/logout so the last caller to finish wins cleanly.
    op_lock: Mutex<()>,
    /// A logout could not delete the stored credential; it must not be restored.
    discard_pending: AtomicBool,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self {
            store,
            state: RwLock::new(SessionState::Unknown),
            op_lock: Mutex::new(()),
            discard_pending: AtomicBool::new(false),
        }
    }

    /// Read the stored credential. Never fails: unreadable or malformed
    /// values resolve to `Anonymous`.
    pub async fn restore(&self) -> SessionState {
        let _guard = self.op_lock.lock().await;

        if self.discard_pending.load(Ordering::Relaxed) {
            if self.discard_stored().await {
                self.discard_pending.store(false, Ordering::Relaxed);
            }
            *self.state.write() = SessionState::Anonymous;
            info!("session restored state=anonymous (stale credential discarded)");
            return SessionState::Anonymous;
        }

        let restored = match self.store.get(AUTH_TOKEN_KEY).await {
            Ok(Some(raw)) => match Credential::new(raw) {
                Ok(credential) => Some(credential),
                Err(_) => {
                    warn!("stored credential is malformed, discarding");
                    self.discard_stored().await;
                    None
                }
            },
            Ok(None) => None,
            Err(StoreError::Corrupt(reason)) => {
                warn!("credential store is corrupt, discarding: {}", reason);
                self.discard_stored().await;
                None
            }
            Err(e) => {
                // The stored token may still be valid; only this run goes anonymous.
                warn!("credential read failed, continuing anonymous: {}", e);
                None
            }
        };

        let mut state = self.state.write();
        let next = match restored {
            Some(credential) => {
                // Re-restoring the same token keeps an identity already fetched.
                let identity = match &*state {
                    SessionState::Authenticated {
                        credential: current,
                        identity,
                    } if *current == credential => identity.clone(),
                    _ => None,
                };
                SessionState::Authenticated {
                    credential,
                    identity,
                }
            }
            None => SessionState::Anonymous,
        };
        *state = next;
        info!("session restored state={}", state.name());
        state.clone()
    }

    /// Persist the credential, then mark the session authenticated.
    /// On a failed write the in-memory state is left untouched.
    pub async fn login(&self, credential: impl Into<String>, identity: Identity) -> ClientResult<()> {
        let credential = Credential::new(credential)?;
        let _guard = self.op_lock.lock().await;
        self.ensure_restored()?;

        self.store
            .set(AUTH_TOKEN_KEY, credential.as_str())
            .await
            .map_err(|e| {
                warn!("credential write failed, login aborted: {}", e);
                ClientError::Persistence(e)
            })?;

        self.discard_pending.store(false, Ordering::Relaxed);
        *self.state.write() = SessionState::Authenticated {
            credential,
            identity: Some(identity),
        };
        info!("session login state=authenticated");
        Ok(())
    }

    /// Delete the stored credential and go anonymous. A failed delete is
    /// reported but the session is anonymous regardless.
    pub async fn logout(&self) -> ClientResult<()> {
        let _guard = self.op_lock.lock().await;
        self.ensure_restored()?;

        let deleted = self.store.delete(AUTH_TOKEN_KEY).await;
        *self.state.write() = SessionState::Anonymous;
        self.discard_pending.store(deleted.is_err(), Ordering::Relaxed);
        info!("session logout state=anonymous");

        deleted.map_err(|e| {
            warn!("credential delete failed after logout: {}", e);
            ClientError::Persistence(e)
        })
    }

    /// Fill in the identity fetched for `credential`. Returns `false` when the
    /// session no longer holds that credential (logged out or replaced by a
    /// login in the meantime); the identity is then dropped.
    pub fn set_identity(&self, credential: &Credential, identity: Identity) -> bool {
        let mut state = self.state.write();
        match &mut *state {
            SessionState::Authenticated {
                credential: current,
                identity: slot,
            } if current == credential => {
                *slot = Some(identity);
                true
            }
            _ => {
                debug!("identity arrived for a credential no longer current, ignored");
                false
            }
        }
    }

    /// In-memory lookup; never touches the durable store.
    pub fn current_credential(&self) -> Option<Credential> {
        self.state.read().credential().cloned()
    }

    pub fn identity(&self) -> Option<Identity> {
        match &*self.state.read() {
            SessionState::Authenticated { identity, .. } => identity.clone(),
            _ => None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.state.read(), SessionState::Authenticated { .. })
    }

    fn ensure_restored(&self) -> ClientResult<()> {
        if *self.state.read() == SessionState::Unknown {
            return Err(ClientError::NotRestored);
        }
        Ok(())
    }

    async fn discard_stored(&self) -> bool {
        match self.store.delete(AUTH_TOKEN_KEY).await {
            Ok(()) => true,
            Err(e) => {
                debug!("discarding stored credential failed: {}", e);
                false
            }
        }
    }
}

impl CredentialSource for SessionManager {
    fn current_credential(&self) -> Option<Credential> {
        SessionManager::current_credential(self)
    }
}
