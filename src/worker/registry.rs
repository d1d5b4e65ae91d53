// Per-origin worker container: decides which version controls navigations.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::info;

use super::clients::{ClientId, Clients};
use super::lifecycle::{FetchEvent, FetchOutcome, OfflineWorker, WorkerState};
use crate::error::ClientResult;

pub struct WorkerRegistry {
    clients: Clients,
    active: RwLock<Option<Arc<OfflineWorker>>>,
    waiting: RwLock<Option<Arc<OfflineWorker>>>,
    lifecycle_lock: Mutex<()>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            clients: Clients::new(),
            active: RwLock::new(None),
            waiting: RwLock::new(None),
            lifecycle_lock: Mutex::new(()),
        }
    }

    /// Install `worker`, then activate it right away when it asked to skip
    /// waiting, when nothing is active, or when no client is open. Otherwise it
    /// waits until the last client closes. A failed install leaves the current
    /// active worker in control.
    pub async fn register(&self, worker: Arc<OfflineWorker>) -> ClientResult<WorkerState> {
        let _guard = self.lifecycle_lock.lock().await;

        worker.on_install().await?;

        let has_active = self.active.read().is_some();
        if !has_active || worker.skip_waiting_requested() || self.clients.is_empty() {
            self.activate(worker.clone()).await?;
        } else {
            let displaced = self.waiting.write().replace(worker.clone());
            if let Some(displaced) = displaced {
                displaced.mark_redundant();
            }
            info!(
                "worker {} waiting for {} open client(s) to close",
                worker.version(),
                self.clients.len()
            );
        }
        Ok(worker.state())
    }

    async fn activate(&self, worker: Arc<OfflineWorker>) -> ClientResult<()> {
        // The previous version keeps serving until the new one is active.
        worker.on_activate(&self.clients).await?;

        let previous = self.active.write().replace(worker.clone());
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &worker) {
                previous.mark_redundant();
            }
        }

        let mut waiting = self.waiting.write();
        if waiting
            .as_ref()
            .is_some_and(|w| Arc::ptr_eq(w, &worker))
        {
            *waiting = None;
        }
        Ok(())
    }

    /// A new page opens under the currently active version.
    pub fn open_client(&self) -> ClientId {
        self.clients.open(self.active_version())
    }

    /// Closing the last page lets a waiting worker take over.
    pub async fn close_client(&self, id: ClientId) -> ClientResult<()> {
        self.clients.close(id);
        if !self.clients.is_empty() {
            return Ok(());
        }

        let _guard = self.lifecycle_lock.lock().await;
        let waiting = self.waiting.write().take();
        if let Some(worker) = waiting {
            info!("last client closed, activating waiting worker {}", worker.version());
            self.activate(worker).await?;
        }
        Ok(())
    }

    /// Route a fetch through the active worker, if any.
    pub async fn handle_fetch(&self, event: FetchEvent) -> FetchOutcome {
        let active = self.active.read().clone();
        match active {
            Some(worker) => worker.on_fetch(event).await,
            None => FetchOutcome::Passthrough(event.request),
        }
    }

    pub fn active(&self) -> Option<Arc<OfflineWorker>> {
        self.active.read().clone()
    }

    pub fn active_version(&self) -> Option<String> {
        self.active.read().as_ref().map(|w| w.version().to_string())
    }

    pub fn waiting_version(&self) -> Option<String> {
        self.waiting.read().as_ref().map(|w| w.version().to_string())
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
