pub mod errors;
pub mod live;
pub mod replica;

use std::time::Duration;

use async_trait::async_trait;

use crate::measurement::{Measurement, Source};
use crate::query::Query;

pub use errors::SourceError;

/// One backend the router can ask for measurements.
///
/// `fetch` performs the I/O and must honor `budget` exactly, with no internal
/// retry. `normalize` decodes the native payload into unified measurements; it
/// does not sort or truncate, the router does that for every source alike.
#[async_trait]
pub trait SourceAdapter: Send + Sync + 'static {
    type Raw: Send + 'static;

    fn kind(&self) -> Source;

    async fn fetch(&self, query: &Query, budget: Duration) -> Result<Self::Raw, SourceError>;

    fn normalize(&self, raw: Self::Raw, query: &Query) -> Result<Vec<Measurement>, SourceError>;
}
