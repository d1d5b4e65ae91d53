// Axum request handler: forwards webview requests upstream through the worker registry.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::config::MAX_FORWARDED_BODY_BYTES;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::worker::{FetchEvent, FetchOutcome, RequestMode, WorkerRegistry};

const SEC_FETCH_MODE: &str = "sec-fetch-mode";

struct ServerState {
    registry: Arc<WorkerRegistry>,
    transport: Arc<dyn HttpTransport>,
    upstream: String,
}

pub struct OfflineServer {
    port: u16,
    registry: Arc<WorkerRegistry>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl OfflineServer {
    /// Start the server on a random loopback port, forwarding to `upstream`.
    pub async fn start(
        registry: Arc<WorkerRegistry>,
        transport: Arc<dyn HttpTransport>,
        upstream: impl Into<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let state = Arc::new(ServerState {
            registry: registry.clone(),
            transport,
            upstream: upstream.into().trim_end_matches('/').to_string(),
        });
        let app = Router::new().fallback(intercept_handler).with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            port,
            registry,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Local URL serving `path` of the upstream origin.
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Classify a request the way a browser labels it. Without `Sec-Fetch-Mode`,
/// an HTML-accepting GET is taken as a page load.
fn classify_mode(method: &Method, headers: &HeaderMap) -> RequestMode {
    if let Some(mode) = headers.get(SEC_FETCH_MODE).and_then(|v| v.to_str().ok()) {
        return match mode.trim() {
            "navigate" => RequestMode::Navigate,
            "same-origin" => RequestMode::SameOrigin,
            "cors" => RequestMode::Cors,
            _ => RequestMode::NoCors,
        };
    }

    let accepts_html = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"));
    if *method == Method::GET && accepts_html {
        RequestMode::Navigate
    } else {
        RequestMode::NoCors
    }
}

/// Drop connection-scoped headers that must not be forwarded.
fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in [
        header::HOST,
        header::CONNECTION,
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
    ] {
        headers.remove(name);
    }
}

fn to_axum_response(resp: HttpResponse) -> Response {
    let mut headers = resp.headers;
    strip_hop_headers(&mut headers);
    (resp.status, headers, resp.body).into_response()
}

async fn intercept_handler(State(state): State<Arc<ServerState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();

    let body = match axum::body::to_bytes(body, MAX_FORWARDED_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!("rejecting request body: {}", e);
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let mode = classify_mode(&parts.method, &parts.headers);
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut headers = parts.headers.clone();
    strip_hop_headers(&mut headers);

    let request = HttpRequest {
        method: parts.method.clone(),
        url: format!("{}{}", state.upstream, path),
        headers,
        body: if body.is_empty() { None } else { Some(body) },
    };

    debug!("intercept {} {} mode={:?}", parts.method, path, mode);

    match state.registry.handle_fetch(FetchEvent::new(request, mode)).await {
        FetchOutcome::Network(resp) | FetchOutcome::Fallback(resp) => to_axum_response(resp),
        FetchOutcome::Passthrough(request) => match state.transport.execute(request).await {
            Ok(resp) => to_axum_response(resp),
            Err(e) => {
                warn!("passthrough {} failed: {}", path, e);
                (StatusCode::BAD_GATEWAY, format!("upstream unreachable: {}", e)).into_response()
            }
        },
    }
}
