// Session lifecycle: durable credential storage and the in-memory session state.

pub mod file_store;
pub mod manager;
pub mod store;

pub use file_store::FileSecureStore;
pub use manager::{Credential, Identity, SessionManager, SessionState};
pub use store::{MemorySecureStore, SecureStore};
