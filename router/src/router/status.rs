use serde::Serialize;

use crate::health::HealthSnapshot;
use crate::metrics::CountersSnapshot;

/// Point-in-time view of the router for operators.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RouterStatus {
    pub live: HealthSnapshot,
    pub replica: HealthSnapshot,
    pub cache_entries: usize,
    pub counters: CountersSnapshot,
}
