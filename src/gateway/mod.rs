// Authenticated request gateway and the typed storefront API built on it.

pub mod endpoints;
pub mod request_gateway;

pub use endpoints::{
    backend_error_message, CartResponse, LoginResponse, StorefrontApi, Suggestion,
    WishlistAction, WishlistToggleResponse,
};
pub use request_gateway::{CredentialSource, RequestGateway};
