use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility. Clones share the same cells.
#[derive(Clone, Default, Debug)]
pub struct Counters {
    pub cache_hits: Arc<AtomicU64>,
    pub cache_misses: Arc<AtomicU64>,

    pub live_served: Arc<AtomicU64>,
    pub replica_served: Arc<AtomicU64>,

    // live path outcomes that led to fallback
    pub live_failures: Arc<AtomicU64>,
    pub live_skipped: Arc<AtomicU64>,
    pub live_insufficient: Arc<AtomicU64>,

    pub circuit_opened: Arc<AtomicU64>,
    pub timeouts: Arc<AtomicU64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub live_served: u64,
    pub replica_served: u64,
    pub live_failures: u64,
    pub live_skipped: u64,
    pub live_insufficient: u64,
    pub circuit_opened: u64,
    pub timeouts: u64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        CountersSnapshot {
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            live_served: load(&self.live_served),
            replica_served: load(&self.replica_served),
            live_failures: load(&self.live_failures),
            live_skipped: load(&self.live_skipped),
            live_insufficient: load(&self.live_insufficient),
            circuit_opened: load(&self.circuit_opened),
            timeouts: load(&self.timeouts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cells() {
        let c = Counters::default();
        let other = c.clone();

        Counters::incr(&other.cache_hits);
        Counters::incr(&c.cache_hits);
        Counters::incr(&c.live_skipped);

        let s = c.snapshot();
        assert_eq!(s.cache_hits, 2);
        assert_eq!(s.live_skipped, 1);
        assert_eq!(s.replica_served, 0);
    }
}
