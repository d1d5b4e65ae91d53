// Typed callers for the storefront backend. Paths and payload shapes are fixed
// by the backend and must not drift.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::request_gateway::RequestGateway;
use crate::config::API_PREFIX;
use crate::error::ClientResult;
use crate::session::Identity;
use crate::transport::HttpRequest;

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: Identity,
}

#[derive(Serialize)]
struct CartItemRequest {
    product_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<i64>,
}

#[derive(Serialize)]
struct WishlistToggleRequest {
    product_id: u64,
}

/// Reply of the cart endpoints; which fields are set depends on the operation.
#[derive(Debug, Clone, Deserialize)]
pub struct CartResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cart_count: Option<u64>,
    #[serde(default)]
    pub total_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WishlistAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WishlistToggleResponse {
    pub success: bool,
    #[serde(default)]
    pub action: Option<WishlistAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Suggestion {
    pub name: String,
    pub url: String,
}

/// Pull the human-readable reason out of a backend JSON error body
/// (`{"error": ...}` from the storefront, `{"msg": ...}` from the auth API).
pub fn backend_error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("msg"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

pub struct StorefrontApi {
    gateway: Arc<RequestGateway>,
}

impl StorefrontApi {
    pub fn new(gateway: Arc<RequestGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    /// `POST /api/auth/login {email, password} -> {access_token, user}`
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<LoginResponse> {
        let req = HttpRequest::post_json(
            format!("{}/auth/login", API_PREFIX),
            &LoginRequest { email, password },
        )?;
        self.gateway.send_json(req).await
    }

    /// `GET /api/auth/me -> user`
    pub async fn profile(&self) -> ClientResult<Identity> {
        self.gateway
            .send_json(HttpRequest::get(format!("{}/auth/me", API_PREFIX)))
            .await
    }

    pub async fn cart_add(&self, product_id: u64, quantity: i64) -> ClientResult<CartResponse> {
        self.cart_call("add", product_id, Some(quantity)).await
    }

    /// A quantity of zero or less removes the line on the backend.
    pub async fn cart_update(&self, product_id: u64, quantity: i64) -> ClientResult<CartResponse> {
        self.cart_call("update", product_id, Some(quantity)).await
    }

    pub async fn cart_remove(&self, product_id: u64) -> ClientResult<CartResponse> {
        self.cart_call("remove", product_id, None).await
    }

    async fn cart_call(
        &self,
        op: &str,
        product_id: u64,
        quantity: Option<i64>,
    ) -> ClientResult<CartResponse> {
        let req = HttpRequest::post_json(
            format!("{}/cart/{}", API_PREFIX, op),
            &CartItemRequest {
                product_id,
                quantity,
            },
        )?;
        self.gateway.send_json(req).await
    }

    /// `POST /api/wishlist/toggle {product_id} -> {success, action}`
    pub async fn wishlist_toggle(&self, product_id: u64) -> ClientResult<WishlistToggleResponse> {
        let req = HttpRequest::post_json(
            format!("{}/wishlist/toggle", API_PREFIX),
            &WishlistToggleRequest { product_id },
        )?;
        self.gateway.send_json(req).await
    }

    /// `GET /api/search/autocomplete?q=... -> [{name, url}, ...]`
    pub async fn autocomplete(&self, query: &str) -> ClientResult<Vec<Suggestion>> {
        let url = format!(
            "{}/search/autocomplete?q={}",
            API_PREFIX,
            urlencoding::encode(query)
        );
        self.gateway.send_json(HttpRequest::get(url)).await
    }
}
