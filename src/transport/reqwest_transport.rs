use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::{debug, warn};

use super::traits::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::TransportError;

/// Transport backed by a shared reqwest `Client`.
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    /// Wrap an existing client (custom TLS roots, proxies, ...).
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn build_request(&self, request: HttpRequest) -> RequestBuilder {
        let mut req = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(self.timeout);
        if let Some(body) = request.body {
            req = req.body(body);
        }
        req
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = request.method.clone();
        let url = request.url.clone();

        let resp = self.build_request(request).send().await.map_err(|e| {
            warn!("http {} {} failed: {}", method, url, e);
            self.map_error(e)
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        debug!("http {} {} status={}", method, url, status.as_u16());

        let body = resp.bytes().await.map_err(|e| self.map_error(e))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
