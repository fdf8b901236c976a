use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::logger::warn_if_slow;
use tracing::{debug, instrument};

use crate::measurement::{Measurement, Source};
use crate::query::Query;
use crate::source::replica::repository::{MeasurementRepository, RangeFilter};
use crate::source::{SourceAdapter, SourceError};

/// Reads the local replica through a [`MeasurementRepository`].
pub struct ReplicaAdapter {
    repo: Arc<dyn MeasurementRepository>,
    slow_query: Duration,
}

impl ReplicaAdapter {
    pub fn new(repo: Arc<dyn MeasurementRepository>) -> Self {
        Self {
            repo,
            slow_query: Duration::from_millis(200),
        }
    }
}

#[async_trait]
impl SourceAdapter for ReplicaAdapter {
    /// The repository already decodes and validates rows.
    type Raw = Vec<Measurement>;

    fn kind(&self) -> Source {
        Source::Replica
    }

    #[instrument(skip(self, query), target = "replica", fields(budget_ms = budget.as_millis() as u64))]
    async fn fetch(&self, query: &Query, budget: Duration) -> Result<Vec<Measurement>, SourceError> {
        let filter = RangeFilter::from(query);
        // One extra valid row tells the normalizer whether the ceiling cut
        // anything.
        let limit = query.max_results() + 1;

        let lookup = warn_if_slow("replica_query_range", self.slow_query, async {
            self.repo.query_range(&filter, limit).await
        });

        let rows = tokio::time::timeout(budget, lookup)
            .await
            .map_err(|_| SourceError::Timeout(budget))?
            .map_err(|e| SourceError::Storage(format!("{e:#}")))?;

        debug!(rows = rows.len(), "replica range query complete");
        Ok(rows)
    }

    fn normalize(&self, raw: Vec<Measurement>, _query: &Query) -> Result<Vec<Measurement>, SourceError> {
        Ok(raw)
    }
}
