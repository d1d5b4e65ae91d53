// HTTP transport abstraction: pluggable backends for the gateway and the worker.

pub mod reqwest_transport;
pub mod traits;

pub use reqwest_transport::ReqwestTransport;
pub use traits::{HttpRequest, HttpResponse, HttpTransport};
