use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::measurement::SourcedResult;
use crate::query::QuerySignature;

/// One memoized resolution. Never mutated; a newer result replaces the whole
/// entry.
#[derive(Debug)]
pub struct CacheEntry {
    pub signature: QuerySignature,
    pub result: Arc<SourcedResult>,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Short-lived memoization of completed results keyed by query signature.
///
/// Guarantees:
/// - Readers get either the previous or the new entry, never a partial one.
/// - Concurrent puts for one signature: last write wins.
/// - Expired entries are dropped on lookup and by [`ResponseCache::sweep`].
/// - Size is bounded by `max_entries`; on overflow the entry closest to
///   expiry goes first.
pub struct ResponseCache {
    max_entries: usize,
    map: RwLock<HashMap<QuerySignature, Arc<CacheEntry>>>,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, signature: &QuerySignature) -> Option<Arc<SourcedResult>> {
        let now = Instant::now();

        {
            let map = self.map.read();
            match map.get(signature) {
                None => return None,
                Some(e) if e.is_live(now) => return Some(e.result.clone()),
                Some(_) => {}
            }
        }

        // Expired: re-check under the write lock, a fresh put may have landed.
        let mut map = self.map.write();
        match map.get(signature) {
            Some(e) if e.is_live(now) => Some(e.result.clone()),
            Some(_) => {
                map.remove(signature);
                debug!(target: "cache", %signature, "evicted expired entry on read");
                None
            }
            None => None,
        }
    }

    pub fn put(&self, signature: QuerySignature, result: Arc<SourcedResult>, ttl: Duration) {
        let now = Instant::now();
        let entry = Arc::new(CacheEntry {
            signature: signature.clone(),
            result,
            expires_at: now + ttl,
        });

        let mut map = self.map.write();

        if !map.contains_key(&signature) && map.len() >= self.max_entries {
            map.retain(|_, e| e.is_live(now));

            if map.len() >= self.max_entries {
                let victim = map
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());

                if let Some(v) = victim {
                    map.remove(&v);
                    debug!(target: "cache", evicted = %v, "cache full; evicted entry nearest expiry");
                }
            }
        }

        map.insert(signature, entry);
    }

    /// Drops every expired entry. Returns how many were removed.
    #[instrument(skip(self), target = "cache", level = "debug")]
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut map = self.map.write();

        let before = map.len();
        map.retain(|_, e| e.is_live(now));
        let removed = before - map.len();

        if removed > 0 {
            debug!(removed, remaining = map.len(), "cache sweep");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

/// Sweeps `cache` every `every` until the cache is dropped.
pub fn spawn_sweeper(cache: &Arc<ResponseCache>, every: Duration) -> JoinHandle<()> {
    let weak: Weak<ResponseCache> = Arc::downgrade(cache);

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        tick.tick().await;

        loop {
            tick.tick().await;
            let Some(cache) = weak.upgrade() else {
                info!(target: "cache", "cache dropped; sweeper exiting");
                break;
            };
            cache.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Source;
    use crate::query::{Parameter, Query};
    use chrono::{TimeZone, Utc};

    fn sig(n: usize) -> QuerySignature {
        Query::builder()
            .bbox(0.0, 1.0, 0.0, 1.0)
            .time_range(
                Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap(),
            )
            .parameter(Parameter::Temperature)
            .max_results(n)
            .build()
            .unwrap()
            .signature()
    }

    fn result(source: Source) -> Arc<SourcedResult> {
        Arc::new(SourcedResult {
            measurements: vec![],
            source,
            fetch_latency: Duration::from_millis(5),
            truncated: false,
            fetched_at: Utc::now(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn hit_until_expiry_then_lazy_eviction() {
        let cache = ResponseCache::new(16);
        cache.put(sig(1), result(Source::Live), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get(&sig(1)).unwrap().source, Source::Live);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&sig(1)).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn last_write_wins() {
        let cache = ResponseCache::new(16);
        cache.put(sig(1), result(Source::Live), Duration::from_secs(10));
        cache.put(sig(1), result(Source::Replica), Duration::from_secs(10));

        assert_eq!(cache.get(&sig(1)).unwrap().source, Source::Replica);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn readers_keep_their_snapshot_across_replacement() {
        let cache = ResponseCache::new(16);
        cache.put(sig(1), result(Source::Live), Duration::from_secs(10));

        let held = cache.get(&sig(1)).unwrap();
        cache.put(sig(1), result(Source::Replica), Duration::from_secs(10));

        assert_eq!(held.source, Source::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_expired() {
        let cache = ResponseCache::new(16);
        cache.put(sig(1), result(Source::Live), Duration::from_secs(5));
        cache.put(sig(2), result(Source::Replica), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&sig(2)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_is_bounded() {
        let cache = ResponseCache::new(2);
        cache.put(sig(1), result(Source::Live), Duration::from_secs(5));
        cache.put(sig(2), result(Source::Live), Duration::from_secs(50));
        cache.put(sig(3), result(Source::Live), Duration::from_secs(50));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&sig(1)).is_none());
        assert!(cache.get(&sig(3)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_and_exits_with_cache() {
        let cache = Arc::new(ResponseCache::new(16));
        cache.put(sig(1), result(Source::Live), Duration::from_secs(1));

        let handle = spawn_sweeper(&cache, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.len(), 0);

        drop(cache);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.is_finished());
    }
}
