use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result count used when the caller does not ask for one.
pub const DEFAULT_MAX_RESULTS: usize = 500;
/// Hard ceiling; larger requests are clamped, never rejected.
pub const MAX_RESULTS_CEILING: usize = 5_000;
/// Full water column, used when no depth range is given.
pub const DEFAULT_MAX_DEPTH_M: f64 = 11_000.0;

/// Decimal places kept for coordinates and radius.
const COORD_PLACES: i32 = 6;
/// Decimal places kept for depths.
const DEPTH_PLACES: i32 = 2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("time range is inverted: end {end} is before start {start}")]
    InvertedTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("depth range invalid: min {min} / max {max} (meters, 0 <= min <= max)")]
    InvalidDepthRange { min: f64, max: f64 },

    #[error("latitude out of range [-90, 90]: {0}")]
    LatitudeOutOfRange(f64),

    #[error("longitude out of range [-180, 180]: {0}")]
    LongitudeOutOfRange(f64),

    #[error("bounding box is inverted on the {axis} axis: {min} > {max}")]
    InvertedBox {
        axis: &'static str,
        min: f64,
        max: f64,
    },

    #[error("radius must be a positive number of degrees: {0}")]
    InvalidRadius(f64),

    #[error("spatial bounds are required")]
    MissingBounds,

    #[error("time range is required")]
    MissingTimeRange,

    #[error("at least one parameter is required")]
    NoParameters,

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("max results must be at least 1")]
    ZeroResults,
}

/// Measured quantity a query can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    /// Degrees Celsius.
    Temperature,
    /// Practical salinity units.
    Salinity,
    /// Decibars.
    Pressure,
    /// Dissolved oxygen, micromol/kg.
    Oxygen,
    /// Chlorophyll-a, mg/m3.
    Chlorophyll,
}

impl Parameter {
    pub const ALL: [Parameter; 5] = [
        Parameter::Temperature,
        Parameter::Salinity,
        Parameter::Pressure,
        Parameter::Oxygen,
        Parameter::Chlorophyll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Temperature => "temperature",
            Parameter::Salinity => "salinity",
            Parameter::Pressure => "pressure",
            Parameter::Oxygen => "oxygen",
            Parameter::Chlorophyll => "chlorophyll",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parameter {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Parameter::ALL
            .into_iter()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| QueryError::UnknownParameter(s.to_string()))
    }
}

/// Axis-aligned lat/lon box, edges inclusive. Boxes crossing the
/// antimeridian are not representable; callers split them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<Self, QueryError> {
        for lat in [min_lat, max_lat] {
            check_lat(lat)?;
        }
        for lon in [min_lon, max_lon] {
            check_lon(lon)?;
        }
        if min_lat > max_lat {
            return Err(QueryError::InvertedBox {
                axis: "latitude",
                min: min_lat,
                max: max_lat,
            });
        }
        if min_lon > max_lon {
            return Err(QueryError::InvertedBox {
                axis: "longitude",
                min: min_lon,
                max: max_lon,
            });
        }

        Ok(Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    /// Box of +/- `radius_deg` around a center, clamped to valid coordinates.
    pub fn around(center_lat: f64, center_lon: f64, radius_deg: f64) -> Result<Self, QueryError> {
        check_lat(center_lat)?;
        check_lon(center_lon)?;
        if !radius_deg.is_finite() || radius_deg <= 0.0 {
            return Err(QueryError::InvalidRadius(radius_deg));
        }

        Ok(Self {
            min_lat: (center_lat - radius_deg).max(-90.0),
            max_lat: (center_lat + radius_deg).min(90.0),
            min_lon: (center_lon - radius_deg).max(-180.0),
            max_lon: (center_lon + radius_deg).min(180.0),
        })
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// Spatial part of a query, kept in the form the caller expressed it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpatialBounds {
    Box(BoundingBox),
    Radius {
        center_lat: f64,
        center_lon: f64,
        radius_deg: f64,
    },
}

impl SpatialBounds {
    /// Box used for filtering. For radius bounds this is the enclosing square,
    /// matching what the providers accept.
    pub fn envelope(&self) -> BoundingBox {
        match *self {
            SpatialBounds::Box(b) => b,
            SpatialBounds::Radius {
                center_lat,
                center_lon,
                radius_deg,
            } => BoundingBox {
                min_lat: (center_lat - radius_deg).max(-90.0),
                max_lat: (center_lat + radius_deg).min(90.0),
                min_lon: (center_lon - radius_deg).max(-180.0),
                max_lon: (center_lon + radius_deg).min(180.0),
            },
        }
    }

    fn write_canonical(&self, out: &mut String) {
        match *self {
            SpatialBounds::Box(b) => {
                out.push_str("bbox=");
                push_fixed(out, &[b.min_lat, b.max_lat, b.min_lon, b.max_lon], COORD_PLACES as usize);
            }
            SpatialBounds::Radius {
                center_lat,
                center_lon,
                radius_deg,
            } => {
                out.push_str("radius=");
                push_fixed(out, &[center_lat, center_lon, radius_deg], COORD_PLACES as usize);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, QueryError> {
        if end < start {
            return Err(QueryError::InvertedTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthRange {
    pub min_m: f64,
    pub max_m: f64,
}

impl DepthRange {
    pub fn new(min_m: f64, max_m: f64) -> Result<Self, QueryError> {
        if !min_m.is_finite() || !max_m.is_finite() || min_m < 0.0 || min_m > max_m {
            return Err(QueryError::InvalidDepthRange {
                min: min_m,
                max: max_m,
            });
        }
        Ok(Self { min_m, max_m })
    }

    pub fn contains(&self, depth_m: f64) -> bool {
        (self.min_m..=self.max_m).contains(&depth_m)
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min_m: 0.0,
            max_m: DEFAULT_MAX_DEPTH_M,
        }
    }
}

/// Cache key derived from every field of a [`Query`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QuerySignature(String);

impl QuerySignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated, immutable data request.
///
/// Only obtainable through [`QueryBuilder::build`], so every `Query` in the
/// system already satisfies the range invariants.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    bounds: SpatialBounds,
    time: TimeRange,
    depth: DepthRange,
    parameters: BTreeSet<Parameter>,
    max_results: usize,
}

impl Query {
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    pub fn bounds(&self) -> &SpatialBounds {
        &self.bounds
    }

    pub fn time(&self) -> &TimeRange {
        &self.time
    }

    pub fn depth(&self) -> &DepthRange {
        &self.depth
    }

    pub fn parameters(&self) -> &BTreeSet<Parameter> {
        &self.parameters
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Deterministic serialization: fixed field order, fixed numeric
    /// precision, parameters in sorted order.
    pub fn signature(&self) -> QuerySignature {
        let mut out = String::with_capacity(160);

        self.bounds.write_canonical(&mut out);

        out.push_str(";time=");
        out.push_str(&self.time.start.to_rfc3339_opts(SecondsFormat::Secs, true));
        out.push(',');
        out.push_str(&self.time.end.to_rfc3339_opts(SecondsFormat::Secs, true));

        out.push_str(";depth=");
        push_fixed(&mut out, &[self.depth.min_m, self.depth.max_m], DEPTH_PLACES as usize);

        out.push_str(";params=");
        let params: Vec<&str> = self.parameters.iter().map(Parameter::as_str).collect();
        out.push_str(&params.join(","));

        out.push_str(";max=");
        out.push_str(&self.max_results.to_string());

        QuerySignature(out)
    }

    /// Whether a point falls inside the query's space/time/depth window.
    pub fn covers(&self, lat: f64, lon: f64, depth_m: f64, at: DateTime<Utc>) -> bool {
        self.bounds.envelope().contains(lat, lon) && self.depth.contains(depth_m) && self.time.contains(at)
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    bounds: Option<SpatialBounds>,
    time: Option<(DateTime<Utc>, DateTime<Utc>)>,
    depth: Option<(f64, f64)>,
    parameters: BTreeSet<Parameter>,
    max_results: Option<usize>,
}

impl QueryBuilder {
    pub fn bbox(mut self, min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        self.bounds = Some(SpatialBounds::Box(BoundingBox {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }));
        self
    }

    pub fn radius(mut self, center_lat: f64, center_lon: f64, radius_deg: f64) -> Self {
        self.bounds = Some(SpatialBounds::Radius {
            center_lat,
            center_lon,
            radius_deg,
        });
        self
    }

    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time = Some((start, end));
        self
    }

    pub fn depth_range(mut self, min_m: f64, max_m: f64) -> Self {
        self.depth = Some((min_m, max_m));
        self
    }

    pub fn parameter(mut self, p: Parameter) -> Self {
        self.parameters.insert(p);
        self
    }

    pub fn parameters(mut self, ps: impl IntoIterator<Item = Parameter>) -> Self {
        self.parameters.extend(ps);
        self
    }

    pub fn max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    /// Validates and freezes the request. Fields are first reduced to the
    /// precision the signature encodes (whole seconds, 1e-6 degrees, 1 cm),
    /// so two queries with the same signature filter identically.
    pub fn build(self) -> Result<Query, QueryError> {
        let bounds = match self.bounds.ok_or(QueryError::MissingBounds)? {
            SpatialBounds::Box(b) => SpatialBounds::Box(BoundingBox::new(
                quantize(b.min_lat, COORD_PLACES),
                quantize(b.max_lat, COORD_PLACES),
                quantize(b.min_lon, COORD_PLACES),
                quantize(b.max_lon, COORD_PLACES),
            )?),
            SpatialBounds::Radius {
                center_lat,
                center_lon,
                radius_deg,
            } => {
                let center_lat = quantize(center_lat, COORD_PLACES);
                let center_lon = quantize(center_lon, COORD_PLACES);
                let radius_deg = quantize(radius_deg, COORD_PLACES);
                BoundingBox::around(center_lat, center_lon, radius_deg)?;
                SpatialBounds::Radius {
                    center_lat,
                    center_lon,
                    radius_deg,
                }
            }
        };

        let (start, end) = self.time.ok_or(QueryError::MissingTimeRange)?;
        TimeRange::new(start, end)?;
        let time = TimeRange::new(start.trunc_subsecs(0), end.trunc_subsecs(0))?;

        let depth = match self.depth {
            Some((min, max)) => {
                DepthRange::new(quantize(min, DEPTH_PLACES), quantize(max, DEPTH_PLACES))?
            }
            None => DepthRange::default(),
        };

        if self.parameters.is_empty() {
            return Err(QueryError::NoParameters);
        }

        let max_results = match self.max_results {
            Some(0) => return Err(QueryError::ZeroResults),
            Some(n) => n.min(MAX_RESULTS_CEILING),
            None => DEFAULT_MAX_RESULTS,
        };

        Ok(Query {
            bounds,
            time,
            depth,
            parameters: self.parameters,
            max_results,
        })
    }
}

fn check_lat(v: f64) -> Result<(), QueryError> {
    if v.is_finite() && (-90.0..=90.0).contains(&v) {
        Ok(())
    } else {
        Err(QueryError::LatitudeOutOfRange(v))
    }
}

fn check_lon(v: f64) -> Result<(), QueryError> {
    if v.is_finite() && (-180.0..=180.0).contains(&v) {
        Ok(())
    } else {
        Err(QueryError::LongitudeOutOfRange(v))
    }
}

/// Rounds to `places` decimals. Non-finite input passes through for the
/// range checks to reject.
fn quantize(v: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    // `+ 0.0` folds -0.0 into 0.0.
    (v * scale).round() / scale + 0.0
}

fn push_fixed(out: &mut String, values: &[f64], precision: usize) {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        // `+ 0.0` folds -0.0 into 0.0 so both spell the same key.
        out.push_str(&format!("{:.*}", precision, v + 0.0));
    }
}
