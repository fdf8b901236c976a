use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;

use crate::measurement::{Measurement, MeasurementError, MeasurementRecord, QualityFlag};
use crate::query::{Parameter, Query};

/// Range predicates pushed down to the store.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeFilter {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub min_depth_m: f64,
    pub max_depth_m: f64,
    /// A row matches if any of these is non-null.
    pub parameters: Vec<Parameter>,
}

impl From<&Query> for RangeFilter {
    fn from(q: &Query) -> Self {
        let bbox = q.bounds().envelope();
        Self {
            min_lat: bbox.min_lat,
            max_lat: bbox.max_lat,
            min_lon: bbox.min_lon,
            max_lon: bbox.max_lon,
            start_ms: q.time().start.timestamp_millis(),
            end_ms: q.time().end.timestamp_millis(),
            min_depth_m: q.depth().min_m,
            max_depth_m: q.depth().max_m,
            parameters: q.parameters().iter().copied().collect(),
        }
    }
}

/// Stored shape of one observation.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementRow {
    pub platform_id: String,
    pub measured_at_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_m: f64,
    pub temperature: Option<f64>,
    pub salinity: Option<f64>,
    pub pressure: Option<f64>,
    pub oxygen: Option<f64>,
    pub chlorophyll: Option<f64>,
    pub quality_flag: i64,
}

impl MeasurementRow {
    pub fn from_measurement(m: &Measurement) -> Self {
        Self {
            platform_id: m.platform_id().to_string(),
            measured_at_ms: m.observed_at().timestamp_millis(),
            latitude: m.latitude(),
            longitude: m.longitude(),
            depth_m: m.depth_m(),
            temperature: m.value(Parameter::Temperature),
            salinity: m.value(Parameter::Salinity),
            pressure: m.value(Parameter::Pressure),
            oxygen: m.value(Parameter::Oxygen),
            chlorophyll: m.value(Parameter::Chlorophyll),
            quality_flag: m.quality().code(),
        }
    }

    pub fn into_measurement(self) -> Result<Measurement, MeasurementError> {
        let observed_at = DateTime::from_timestamp_millis(self.measured_at_ms)
            .ok_or(MeasurementError::Timestamp(self.measured_at_ms))?;

        Measurement::try_from(MeasurementRecord {
            latitude: self.latitude,
            longitude: self.longitude,
            depth_m: self.depth_m,
            observed_at,
            quality: QualityFlag::from_code(self.quality_flag)?,
            platform_id: self.platform_id,
            values: BTreeMap::from([
                (Parameter::Temperature, self.temperature),
                (Parameter::Salinity, self.salinity),
                (Parameter::Pressure, self.pressure),
                (Parameter::Oxygen, self.oxygen),
                (Parameter::Chlorophyll, self.chlorophyll),
            ]),
        })
    }
}

#[async_trait]
pub trait MeasurementRepository: Send + Sync {
    /// Valid measurements matching `filter`, newest first then by platform
    /// id, at most `limit` of them. Stored rows that fail validation are
    /// skipped and do not count toward `limit`.
    async fn query_range(&self, filter: &RangeFilter, limit: usize) -> Result<Vec<Measurement>>;

    /// Upserts measurements keyed by (platform, time, depth). Returns the
    /// number of rows written.
    async fn insert_batch(&self, batch: &[Measurement]) -> Result<u64>;

    async fn count(&self) -> Result<u64>;
}
