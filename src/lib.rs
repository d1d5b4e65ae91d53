// Client core for the MegaMart storefront: session lifecycle, authenticated
// API gateway and the offline navigation cache worker.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod server;
pub mod session;
pub mod transport;
pub mod worker;

pub use error::{ClientError, ClientResult, StoreError, TransportError};
