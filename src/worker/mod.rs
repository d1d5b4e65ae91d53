// Offline cache worker: versioned cache stores, lifecycle and navigation fallback.

pub mod cache;
pub mod clients;
pub mod lifecycle;
pub mod registry;
pub mod stats;

pub use cache::{CacheStorage, CachedResponse, DiskCacheStorage, MemoryCacheStorage};
pub use clients::{ClientId, Clients};
pub use lifecycle::{FetchEvent, FetchOutcome, OfflineWorker, RequestMode, WorkerState};
pub use registry::WorkerRegistry;
pub use stats::{FetchStats, FetchStatsSnapshot};
