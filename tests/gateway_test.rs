// Integration tests for the request gateway and storefront API against a fake backend.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use megamart_client_engine::api::ClientEngine;
use megamart_client_engine::config::{ClientConfig, AUTH_TOKEN_KEY};
use megamart_client_engine::gateway::{backend_error_message, WishlistAction};
use megamart_client_engine::session::{Identity, MemorySecureStore, SecureStore, SessionState};
use megamart_client_engine::transport::{HttpRequest, HttpTransport, ReqwestTransport};
use megamart_client_engine::worker::MemoryCacheStorage;
use megamart_client_engine::ClientError;

const VALID_TOKEN: &str = "tok123";

/// What the fake backend saw, per request.
#[derive(Default)]
struct Recorded {
    authorization: Vec<Option<String>>,
    bodies: Vec<Value>,
}

type Shared = Arc<Mutex<Recorded>>;

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn echo_auth(State(rec): State<Shared>, headers: HeaderMap) -> impl IntoResponse {
    let auth = bearer(&headers);
    rec.lock().authorization.push(auth.clone());
    auth.unwrap_or_else(|| "none".to_string())
}

async fn login(Json(body): Json<Value>) -> impl IntoResponse {
    if body["password"] == "secret" {
        (
            StatusCode::OK,
            Json(json!({
                "access_token": VALID_TOKEN,
                "user": {"id": 7, "email": body["email"], "role": "customer"},
            })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"msg": "Bad username or password"})),
        )
    }
}

async fn me(headers: HeaderMap) -> impl IntoResponse {
    if bearer(&headers).as_deref() == Some("Bearer tok123") {
        (
            StatusCode::OK,
            Json(json!({"id": 7, "email": "shopper@example.com"})),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"msg": "Token has expired"})),
        )
    }
}

async fn cart_add(
    State(rec): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut rec = rec.lock();
    rec.authorization.push(bearer(&headers));
    rec.bodies.push(body);
    Json(json!({"success": true, "message": "Товар добавлен в корзину", "cart_count": 2}))
}

async fn cart_update(Json(body): Json<Value>) -> impl IntoResponse {
    if body["quantity"].as_i64().unwrap_or(0) > 99 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "Недостаточно товара на складе"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"success": true, "total_price": 1299.5})),
    )
}

async fn wishlist_toggle(State(rec): State<Shared>, Json(body): Json<Value>) -> impl IntoResponse {
    rec.lock().bodies.push(body);
    Json(json!({"success": true, "action": "added"}))
}

async fn autocomplete(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let q = params.get("q").cloned().unwrap_or_default();
    Json(json!([{"name": q, "url": "/product/1"}]))
}

async fn start_backend() -> (SocketAddr, Shared) {
    let rec: Shared = Arc::new(Mutex::new(Recorded::default()));
    let app = Router::new()
        .route("/echo-auth", get(echo_auth))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/cart/add", post(cart_add))
        .route("/api/cart/update", post(cart_update))
        .route("/api/wishlist/toggle", post(wishlist_toggle))
        .route("/api/search/autocomplete", get(autocomplete))
        .with_state(rec.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, rec)
}

fn engine_for(addr: SocketAddr, store: Arc<MemorySecureStore>) -> ClientEngine {
    let config = ClientConfig {
        base_url: format!("http://{}", addr),
        ..ClientConfig::default()
    };
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(Duration::from_secs(5)));
    ClientEngine::with_parts(
        config,
        store,
        transport,
        Arc::new(MemoryCacheStorage::new()),
    )
}

async fn echo(engine: &ClientEngine) -> String {
    let resp = engine
        .api()
        .gateway()
        .send(HttpRequest::get("/echo-auth"))
        .await
        .unwrap();
    String::from_utf8(resp.body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_bearer_header_follows_session() {
    let (addr, rec) = start_backend().await;
    let engine = engine_for(addr, Arc::new(MemorySecureStore::new()));
    engine.startup().await;

    assert_eq!(echo(&engine).await, "none");

    engine
        .session()
        .login(VALID_TOKEN, Identity::new(json!({"id": 7})))
        .await
        .unwrap();
    assert_eq!(echo(&engine).await, "Bearer tok123");

    engine.sign_out().await.unwrap();
    assert_eq!(echo(&engine).await, "none");

    let seen = rec.lock().authorization.clone();
    assert_eq!(seen, vec![None, Some("Bearer tok123".to_string()), None]);
}

#[tokio::test]
async fn test_caller_authorization_is_replaced() {
    let (addr, _rec) = start_backend().await;
    let engine = engine_for(addr, Arc::new(MemorySecureStore::new()));
    engine.startup().await;

    let mut req = HttpRequest::get("/echo-auth");
    req.headers
        .insert(header::AUTHORIZATION, "Bearer forged".parse().unwrap());
    let resp = engine.api().gateway().send(req).await.unwrap();
    assert_eq!(&resp.body[..], b"none");
}

#[tokio::test]
async fn test_sign_in_then_storefront_calls() {
    let (addr, rec) = start_backend().await;
    let store = Arc::new(MemorySecureStore::new());
    let engine = engine_for(addr, store.clone());
    engine.startup().await;

    engine
        .sign_in("shopper@example.com", "secret")
        .await
        .unwrap();
    assert!(engine.session().is_authenticated());
    assert_eq!(
        store.get(AUTH_TOKEN_KEY).await.unwrap().as_deref(),
        Some(VALID_TOKEN)
    );
    let identity = engine.session().identity().unwrap();
    assert_eq!(identity.get("email").unwrap(), "shopper@example.com");

    let cart = engine.api().cart_add(5, 2).await.unwrap();
    assert!(cart.success);
    assert_eq!(cart.cart_count, Some(2));

    let toggled = engine.api().wishlist_toggle(5).await.unwrap();
    assert_eq!(toggled.action, Some(WishlistAction::Added));

    let suggestions = engine.api().autocomplete("red shoes & bags").await.unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].name, "red shoes & bags");

    let rec = rec.lock();
    assert_eq!(rec.bodies[0], json!({"product_id": 5, "quantity": 2}));
    assert_eq!(rec.bodies[1], json!({"product_id": 5}));
    assert_eq!(rec.authorization, vec![Some("Bearer tok123".to_string())]);
}

#[tokio::test]
async fn test_rejected_sign_in_writes_nothing() {
    let (addr, _rec) = start_backend().await;
    let store = Arc::new(MemorySecureStore::new());
    let engine = engine_for(addr, store.clone());
    engine.startup().await;

    let err = engine
        .sign_in("shopper@example.com", "wrong")
        .await
        .unwrap_err();
    match &err {
        ClientError::Backend { status, body } => {
            assert_eq!(*status, 401);
            assert_eq!(
                backend_error_message(body).as_deref(),
                Some("Bad username or password")
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(engine.session().state(), SessionState::Anonymous);
    assert!(!store.contains(AUTH_TOKEN_KEY));
}

#[tokio::test]
async fn test_backend_error_body_is_preserved() {
    let (addr, _rec) = start_backend().await;
    let engine = engine_for(addr, Arc::new(MemorySecureStore::new()));
    engine.startup().await;

    let ok = engine.api().cart_update(5, 3).await.unwrap();
    assert_eq!(ok.total_price, Some(1299.5));

    let err = engine.api().cart_update(5, 500).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    if let ClientError::Backend { body, .. } = err {
        assert_eq!(
            backend_error_message(&body).as_deref(),
            Some("Недостаточно товара на складе")
        );
    }
}

#[tokio::test]
async fn test_startup_loads_profile_for_stored_token() {
    let (addr, _rec) = start_backend().await;
    let store = Arc::new(MemorySecureStore::new());
    store.insert_raw(AUTH_TOKEN_KEY, VALID_TOKEN);
    let engine = engine_for(addr, store);

    match engine.startup().await {
        SessionState::Authenticated {
            credential,
            identity,
        } => {
            assert_eq!(credential.as_str(), VALID_TOKEN);
            assert_eq!(identity.unwrap().get("id").unwrap(), 7);
        }
        other => panic!("unexpected state: {:?}", other),
    }
}

#[tokio::test]
async fn test_startup_with_expired_token_stays_pending() {
    let (addr, _rec) = start_backend().await;
    let store = Arc::new(MemorySecureStore::new());
    store.insert_raw(AUTH_TOKEN_KEY, "expired");
    let engine = engine_for(addr, store.clone());

    // The gateway does not interpret 401; the token stays until logout.
    let state = engine.startup().await;
    assert_eq!(state.credential().unwrap().as_str(), "expired");
    assert!(engine.session().identity().is_none());
    assert!(store.contains(AUTH_TOKEN_KEY));
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    // Bind and drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let engine = engine_for(addr, Arc::new(MemorySecureStore::new()));
    engine.startup().await;

    let err = engine.api().profile().await.unwrap_err();
    assert!(matches!(err, ClientError::Network(_)), "got {:?}", err);
    assert_eq!(err.status(), None);
}
