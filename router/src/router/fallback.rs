//! Fallback router.
//!
//! Responsibilities:
//! - Answer a structured query from the response cache when possible.
//! - Otherwise try the live source under `T_live`, gated by its circuit.
//! - Fall back to the replica when live is skipped, failing, or insufficient.
//! - Normalize, tag, and cache whatever is served.
//!
//! Non-responsibilities:
//! - Same-call retries (a caller retries by calling `resolve` again).
//! - De-duplicating concurrent first-time resolutions of one signature.
//!
//! Liveness: every call returns within `T_total`. When the budget runs out the
//! in-flight adapter future is dropped and `RouterError::Timeout` is returned.

use std::sync::Arc;

use chrono::Utc;
use common::logger::{TraceId, child_span, root_span};
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, field, info, warn};

use crate::cache::ResponseCache;
use crate::error::RouterError;
use crate::health::{Admission, HealthTracker, Transition};
use crate::measurement::normalizer::{Normalized, finalize, is_sufficient};
use crate::measurement::{Source, SourcedResult};
use crate::metrics::Counters;
use crate::query::{Query, QueryRequest};
use crate::router::policy::RoutingPolicy;
use crate::router::status::RouterStatus;
use crate::source::{SourceAdapter, SourceError};

pub struct FallbackRouter<L, R> {
    live: Arc<L>,
    replica: Arc<R>,

    /// Shared circuit state; may be shared with other routers.
    health: Arc<HealthTracker>,
    cache: Arc<ResponseCache>,

    policy: RoutingPolicy,

    /// Observability counters (does not affect behavior).
    counters: Counters,
}

impl<L, R> FallbackRouter<L, R>
where
    L: SourceAdapter,
    R: SourceAdapter,
{
    pub fn new(
        live: Arc<L>,
        replica: Arc<R>,
        health: Arc<HealthTracker>,
        cache: Arc<ResponseCache>,
        policy: RoutingPolicy,
    ) -> Self {
        Self {
            live,
            replica,
            health,
            cache,
            policy: policy.normalized(),
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            live: self.health.snapshot(Source::Live),
            replica: self.health.snapshot(Source::Replica),
            cache_entries: self.cache.len(),
            counters: self.counters.snapshot(),
        }
    }

    /// Validates an untyped request, then resolves it. Validation failures are
    /// returned before any adapter or cache is touched.
    pub async fn resolve_request(
        &self,
        request: QueryRequest,
    ) -> Result<Arc<SourcedResult>, RouterError> {
        let query = request.into_query().map_err(|e| {
            debug!(error = %e, "rejected invalid query");
            RouterError::InvalidQuery(e)
        })?;
        self.resolve(&query).await
    }

    /// Resolves `query` to a source-tagged result or a typed failure.
    pub async fn resolve(&self, query: &Query) -> Result<Arc<SourcedResult>, RouterError> {
        self.resolve_with_trace(query, TraceId::default()).await
    }

    /// Same as [`Self::resolve`], correlated under the caller's trace id.
    pub async fn resolve_with_trace(
        &self,
        query: &Query,
        trace_id: TraceId,
    ) -> Result<Arc<SourcedResult>, RouterError> {
        let span = root_span("resolve", &trace_id);
        self.resolve_traced(query).instrument(span).await
    }

    async fn resolve_traced(&self, query: &Query) -> Result<Arc<SourcedResult>, RouterError> {
        let started = Instant::now();
        let signature = query.signature();
        Span::current().record("signature", field::display(&signature));

        if let Some(hit) = self.cache.get(&signature) {
            Counters::incr(&self.counters.cache_hits);
            Span::current().record("source", hit.source.as_str());
            info!(
                source = %hit.source,
                cache = "hit",
                rows = hit.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "served from cache"
            );
            return Ok(hit);
        }
        Counters::incr(&self.counters.cache_misses);

        let total = self.policy.total_budget;
        let deadline = started + total;

        let result = match tokio::time::timeout(total, self.resolve_uncached(query, deadline)).await
        {
            Ok(Ok(r)) => Arc::new(r),
            Ok(Err(e)) => {
                if matches!(e, RouterError::Timeout(_)) {
                    Counters::incr(&self.counters.timeouts);
                }
                warn!(
                    error = %e,
                    kind = e.kind(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "query failed"
                );
                return Err(e);
            }
            Err(_) => {
                Counters::incr(&self.counters.timeouts);
                warn!(
                    budget_ms = total.as_millis() as u64,
                    "total budget exhausted; abandoning in-flight fetch"
                );
                return Err(RouterError::Timeout(total));
            }
        };

        let ttl = match result.source {
            Source::Live => self.policy.live_ttl,
            Source::Replica => self.policy.replica_ttl,
        };
        self.cache.put(signature, result.clone(), ttl);

        Span::current().record("source", result.source.as_str());
        info!(
            source = %result.source,
            cache = "miss",
            rows = result.len(),
            truncated = result.truncated,
            fetch_ms = result.fetch_latency.as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query resolved"
        );

        Ok(result)
    }

    async fn resolve_uncached(
        &self,
        query: &Query,
        deadline: Instant,
    ) -> Result<SourcedResult, RouterError> {
        let live_span = child_span("live_attempt");
        live_span.record("source", Source::Live.as_str());
        if let Some(served) = self.try_live(query).instrument(live_span).await {
            return Ok(served);
        }

        let replica_span = child_span("replica_attempt");
        replica_span.record("source", Source::Replica.as_str());
        self.from_replica(query, deadline)
            .instrument(replica_span)
            .await
    }

    /// `Some` only for a sufficient live result. Every other outcome falls
    /// through to the replica.
    async fn try_live(&self, query: &Query) -> Option<SourcedResult> {
        let admission = self.health.try_acquire(Source::Live);
        if let Admission::Rejected { retry_in } = admission {
            Counters::incr(&self.counters.live_skipped);
            info!(
                retry_in_ms = retry_in.as_millis() as u64,
                "live circuit open; going to replica"
            );
            return None;
        }

        let started = Instant::now();
        let budget = self.policy.live_budget;

        // Adapters honor the budget themselves; the outer timeout also covers
        // one that does not.
        let fetched = match tokio::time::timeout(budget, self.live.fetch(query, budget)).await {
            Ok(r) => r,
            Err(_) => Err(SourceError::Timeout(budget)),
        };

        let outcome = fetched
            .and_then(|raw| self.live.normalize(raw, query))
            .map(|ms| finalize(ms, query));

        match outcome {
            Ok(n) if is_sufficient(&n, query) => {
                self.note(self.health.record_success(Source::Live));
                Counters::incr(&self.counters.live_served);
                Some(tag(n, Source::Live, started))
            }
            Ok(n) => {
                Counters::incr(&self.counters.live_insufficient);
                // An empty region is not the provider's fault. A probe still
                // proved the provider reachable.
                if admission == Admission::Probe {
                    self.note(self.health.record_success(Source::Live));
                }
                info!(
                    rows = n.measurements.len(),
                    "live result insufficient; falling back to replica"
                );
                None
            }
            Err(e) => {
                Counters::incr(&self.counters.live_failures);
                self.note(self.health.record_failure(Source::Live));
                warn!(
                    error = %e,
                    kind = e.kind(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "live fetch failed; falling back to replica"
                );
                None
            }
        }
    }

    async fn from_replica(
        &self,
        query: &Query,
        deadline: Instant,
    ) -> Result<SourcedResult, RouterError> {
        let started = Instant::now();
        let remaining = deadline.saturating_duration_since(started);
        if remaining.is_zero() {
            return Err(RouterError::Timeout(self.policy.total_budget));
        }

        let outcome = self
            .replica
            .fetch(query, remaining)
            .await
            .and_then(|raw| self.replica.normalize(raw, query))
            .map(|ms| finalize(ms, query));

        match outcome {
            Ok(n) => {
                self.note(self.health.record_success(Source::Replica));
                Counters::incr(&self.counters.replica_served);
                Ok(tag(n, Source::Replica, started))
            }
            Err(SourceError::Timeout(_)) => Err(RouterError::Timeout(self.policy.total_budget)),
            Err(e) => {
                self.note(self.health.record_failure(Source::Replica));
                Err(RouterError::NoDataAvailable(e))
            }
        }
    }

    fn note(&self, transition: Option<Transition>) {
        if let Some(Transition::Opened { .. } | Transition::Reopened { .. }) = transition {
            Counters::incr(&self.counters.circuit_opened);
        }
    }
}

fn tag(n: Normalized, source: Source, started: Instant) -> SourcedResult {
    SourcedResult {
        measurements: n.measurements,
        source,
        fetch_latency: started.elapsed(),
        truncated: n.truncated,
        fetched_at: Utc::now(),
    }
}
