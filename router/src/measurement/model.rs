use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::{BoundingBox, Parameter};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasurementError {
    #[error("latitude out of range [-90, 90]: {0}")]
    Latitude(f64),

    #[error("longitude out of range [-180, 180]: {0}")]
    Longitude(f64),

    #[error("depth must be finite and >= 0: {0}")]
    Depth(f64),

    #[error("non-finite value for {0}")]
    NonFiniteValue(Parameter),

    #[error("platform id is empty")]
    EmptyPlatform,

    #[error("unknown quality flag code: {0}")]
    UnknownQuality(i64),

    #[error("timestamp out of range: {0} ms")]
    Timestamp(i64),
}

/// Data quality as reported by the producing platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Good,
    Questionable,
    Bad,
}

impl QualityFlag {
    /// Integer codes used by the stores: 1 good, 2 questionable, 3 bad.
    pub fn from_code(code: i64) -> Result<Self, MeasurementError> {
        match code {
            1 => Ok(QualityFlag::Good),
            2 => Ok(QualityFlag::Questionable),
            3 => Ok(QualityFlag::Bad),
            other => Err(MeasurementError::UnknownQuality(other)),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            QualityFlag::Good => 1,
            QualityFlag::Questionable => 2,
            QualityFlag::Bad => 3,
        }
    }
}

/// Unvalidated measurement fields, as read from a payload or an ingest file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub depth_m: f64,
    pub observed_at: DateTime<Utc>,
    pub quality: QualityFlag,
    pub platform_id: String,
    #[serde(default)]
    pub values: BTreeMap<Parameter, Option<f64>>,
}

/// Unified observation record emitted by every source.
///
/// Fields are private and there are no setters: once built, a measurement is
/// a plain value. `None` in `values` means "not measured".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MeasurementRecord")]
pub struct Measurement {
    latitude: f64,
    longitude: f64,
    depth_m: f64,
    observed_at: DateTime<Utc>,
    quality: QualityFlag,
    platform_id: String,
    values: BTreeMap<Parameter, Option<f64>>,
}

impl TryFrom<MeasurementRecord> for Measurement {
    type Error = MeasurementError;

    fn try_from(r: MeasurementRecord) -> Result<Self, Self::Error> {
        if !r.latitude.is_finite() || !(-90.0..=90.0).contains(&r.latitude) {
            return Err(MeasurementError::Latitude(r.latitude));
        }
        if !r.longitude.is_finite() || !(-180.0..=180.0).contains(&r.longitude) {
            return Err(MeasurementError::Longitude(r.longitude));
        }
        if !r.depth_m.is_finite() || r.depth_m < 0.0 {
            return Err(MeasurementError::Depth(r.depth_m));
        }
        let platform_id = r.platform_id.trim().to_string();
        if platform_id.is_empty() {
            return Err(MeasurementError::EmptyPlatform);
        }
        for (p, v) in &r.values {
            if matches!(v, Some(x) if !x.is_finite()) {
                return Err(MeasurementError::NonFiniteValue(*p));
            }
        }

        Ok(Self {
            latitude: r.latitude,
            longitude: r.longitude,
            depth_m: r.depth_m,
            observed_at: r.observed_at,
            quality: r.quality,
            platform_id,
            values: r.values,
        })
    }
}

impl Measurement {
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn depth_m(&self) -> f64 {
        self.depth_m
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn quality(&self) -> QualityFlag {
        self.quality
    }

    pub fn platform_id(&self) -> &str {
        &self.platform_id
    }

    pub fn values(&self) -> &BTreeMap<Parameter, Option<f64>> {
        &self.values
    }

    pub fn value(&self, p: Parameter) -> Option<f64> {
        self.values.get(&p).copied().flatten()
    }

    /// True if at least one of `params` carries a value.
    pub fn measures_any(&self, params: &BTreeSet<Parameter>) -> bool {
        params.iter().any(|p| self.value(*p).is_some())
    }

    /// Copy restricted to exactly `params`: one slot per requested parameter,
    /// nothing else.
    pub fn project(&self, params: &BTreeSet<Parameter>) -> Measurement {
        Measurement {
            values: params.iter().map(|p| (*p, self.value(*p))).collect(),
            platform_id: self.platform_id.clone(),
            ..*self
        }
    }
}

/// Which backend produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Live,
    Replica,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Live => "live",
            Source::Replica => "replica",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered measurements plus provenance. Shared read-only once cached.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourcedResult {
    pub measurements: Vec<Measurement>,
    pub source: Source,
    pub fetch_latency: Duration,
    /// More rows matched than `max_results` allowed.
    pub truncated: bool,
    pub fetched_at: DateTime<Utc>,
}

impl SourcedResult {
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Smallest box holding every returned measurement.
    pub fn extent(&self) -> Option<BoundingBox> {
        let first = self.measurements.first()?;
        let init = BoundingBox {
            min_lat: first.latitude,
            max_lat: first.latitude,
            min_lon: first.longitude,
            max_lon: first.longitude,
        };

        Some(self.measurements.iter().fold(init, |b, m| BoundingBox {
            min_lat: b.min_lat.min(m.latitude),
            max_lat: b.max_lat.max(m.latitude),
            min_lon: b.min_lon.min(m.longitude),
            max_lon: b.max_lon.max(m.longitude),
        }))
    }
}
