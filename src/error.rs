// Error taxonomy shared by the session, gateway and worker layers.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Failure of a durable key-value store or of the cache storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Transport-level failure: the request never produced an HTTP response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// The durable store could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    /// Non-2xx response, surfaced uninterpreted.
    #[error("backend returned HTTP {status}")]
    Backend { status: u16, body: Bytes },

    /// The worker could not pre-cache its fallback page.
    #[error("installation of cache version {version} failed: {reason}")]
    Installation { version: String, reason: String },

    #[error("session has not been restored yet")]
    NotRestored,

    #[error("credential must be a non-empty, header-safe token")]
    InvalidCredential,

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("worker {version} is {found}, expected {expected}")]
    InvalidState {
        version: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl ClientError {
    /// HTTP status of a backend rejection, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
