// Fetch interception counters: how navigations were answered.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub struct FetchStatsSnapshot {
    pub navigations: u64,
    pub network_responses: u64,
    pub fallbacks_served: u64,
    /// Fallbacks answered with the synthesized page because the cache entry was gone.
    pub fallbacks_missing: u64,
    pub passthroughs: u64,
    pub fallback_rate: f64,
}

pub struct FetchStats {
    navigations: AtomicU64,
    network_responses: AtomicU64,
    fallbacks_served: AtomicU64,
    fallbacks_missing: AtomicU64,
    passthroughs: AtomicU64,
}

impl FetchStats {
    pub fn new() -> Self {
        Self {
            navigations: AtomicU64::new(0),
            network_responses: AtomicU64::new(0),
            fallbacks_served: AtomicU64::new(0),
            fallbacks_missing: AtomicU64::new(0),
            passthroughs: AtomicU64::new(0),
        }
    }

    pub fn record_navigation(&self) {
        self.navigations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network(&self) {
        self.network_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self, from_cache: bool) {
        self.fallbacks_served.fetch_add(1, Ordering::Relaxed);
        if !from_cache {
            self.fallbacks_missing.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_passthrough(&self) {
        self.passthroughs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FetchStatsSnapshot {
        let navigations = self.navigations.load(Ordering::Relaxed);
        let fallbacks_served = self.fallbacks_served.load(Ordering::Relaxed);
        let fallback_rate = if navigations > 0 {
            fallbacks_served as f64 / navigations as f64
        } else {
            0.0
        };

        FetchStatsSnapshot {
            navigations,
            network_responses: self.network_responses.load(Ordering::Relaxed),
            fallbacks_served,
            fallbacks_missing: self.fallbacks_missing.load(Ordering::Relaxed),
            passthroughs: self.passthroughs.load(Ordering::Relaxed),
            fallback_rate,
        }
    }
}

impl Default for FetchStats {
    fn default() -> Self {
        Self::new()
    }
}
