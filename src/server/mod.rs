// Local HTTP front: routes page loads from a webview through the offline worker.

pub mod handler;

pub use handler::OfflineServer;
