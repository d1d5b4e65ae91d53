use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::session::Credential;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Synchronous, I/O-free credential lookup consulted on every request.
pub trait CredentialSource: Send + Sync {
    fn current_credential(&self) -> Option<Credential>;
}

/// Stateless wrapper over the transport that attaches the current bearer
/// credential to requests for the backend origin. One attempt per call;
/// responses are not interpreted.
pub struct RequestGateway {
    base_url: String,
    origin: Option<String>,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialSource>,
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn origin_of(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| u.origin().ascii_serialization())
}

impl RequestGateway {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            origin: origin_of(&base_url),
            base_url,
            transport,
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URLs pass through; paths are joined onto the base URL.
    pub fn resolve(&self, url: &str) -> String {
        if is_absolute(url) {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    /// Relative paths always target the backend; absolute URLs only when
    /// scheme, host and port match `base_url`.
    pub fn is_backend_url(&self, url: &str) -> bool {
        if !is_absolute(url) {
            return true;
        }
        self.origin.is_some() && origin_of(url) == self.origin
    }

    pub async fn send(&self, mut request: HttpRequest) -> ClientResult<HttpResponse> {
        let to_backend = self.is_backend_url(&request.url);
        request.url = self.resolve(&request.url);

        // The bearer header must reflect the session at dispatch time only.
        request.headers.remove(AUTHORIZATION);
        let credential = if to_backend {
            self.credentials.current_credential()
        } else {
            debug!("{} is outside the backend origin, sending unauthenticated", request.url);
            None
        };
        if let Some(credential) = credential {
            match HeaderValue::from_str(&format!("Bearer {}", credential.as_str())) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(e) => {
                    warn!("credential unusable as header, sending unauthenticated: {}", e);
                }
            }
        }

        let method = request.method.clone();
        let url = request.url.clone();
        let authenticated = request.headers.contains_key(AUTHORIZATION);

        let response = self.transport.execute(request).await?;
        let status = response.status.as_u16();

        if !response.status.is_success() {
            warn!(
                "gateway {} {} rejected status={} authenticated={}",
                method, url, status, authenticated
            );
            return Err(ClientError::Backend {
                status,
                body: response.body,
            });
        }

        debug!(
            "gateway {} {} status={} authenticated={} bytes={}",
            method,
            url,
            status,
            authenticated,
            response.body.len()
        );
        Ok(response)
    }

    /// `send` followed by JSON decoding of the body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> ClientResult<T> {
        let response = self.send(request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}
