use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

pub type ClientId = u64;

/// Open client pages and the worker version controlling each (if any).
pub struct Clients {
    next_id: AtomicU64,
    controllers: RwLock<BTreeMap<ClientId, Option<String>>>,
}

impl Clients {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            controllers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn open(&self, controller: Option<String>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.controllers.write().insert(id, controller);
        id
    }

    pub fn close(&self, id: ClientId) -> bool {
        self.controllers.write().remove(&id).is_some()
    }

    /// Put every open client under `version`. Returns how many changed controller.
    pub fn claim(&self, version: &str) -> usize {
        let mut controllers = self.controllers.write();
        let mut changed = 0;
        for controller in controllers.values_mut() {
            if controller.as_deref() != Some(version) {
                *controller = Some(version.to_string());
                changed += 1;
            }
        }
        changed
    }

    pub fn controller(&self, id: ClientId) -> Option<String> {
        self.controllers.read().get(&id).cloned().flatten()
    }

    pub fn len(&self) -> usize {
        self.controllers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.read().is_empty()
    }
}

impl Default for Clients {
    fn default() -> Self {
        Self::new()
    }
}
