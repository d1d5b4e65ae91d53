// Public entry points for the app shell.

pub mod client_api;
pub mod simple;

pub use client_api::ClientEngine;
pub use simple::init_tracing;
