use std::time::Duration;

/// Budgets and cache lifetimes for one router instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Hard ceiling on one resolution (`T_total`).
    pub total_budget: Duration,
    /// Live attempt sub-budget (`T_live`), strictly below `total_budget`.
    pub live_budget: Duration,
    /// Cache lifetime for live results (`T_cache`).
    pub live_ttl: Duration,
    /// Cache lifetime for replica results (`T_cache_replica`).
    pub replica_ttl: Duration,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            total_budget: Duration::from_secs(4),
            live_budget: Duration::from_secs(3),
            live_ttl: Duration::from_secs(30 * 60),
            replica_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl RoutingPolicy {
    /// Clamps the live budget below the total one so the replica is never
    /// starved.
    pub fn normalized(self) -> Self {
        let live_budget = if self.live_budget >= self.total_budget {
            self.total_budget.mul_f64(0.75)
        } else {
            self.live_budget
        };
        Self { live_budget, ..self }
    }
}
