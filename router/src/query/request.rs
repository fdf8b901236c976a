use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::query::model::{DepthRange, Parameter, Query, QueryError, SpatialBounds};

/// Unvalidated query as handed over by the upstream query-understanding
/// service. Turned into a [`Query`] at the router boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub bounds: SpatialBounds,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub min_depth_m: Option<f64>,
    #[serde(default)]
    pub max_depth_m: Option<f64>,
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

impl QueryRequest {
    pub fn into_query(self) -> Result<Query, QueryError> {
        let mut b = Query::builder()
            .time_range(self.start, self.end)
            .parameters(self.parameters);

        b = match self.bounds {
            SpatialBounds::Box(bx) => b.bbox(bx.min_lat, bx.max_lat, bx.min_lon, bx.max_lon),
            SpatialBounds::Radius {
                center_lat,
                center_lon,
                radius_deg,
            } => b.radius(center_lat, center_lon, radius_deg),
        };

        match (self.min_depth_m, self.max_depth_m) {
            (None, None) => {}
            (min, max) => {
                let d = DepthRange::default();
                b = b.depth_range(min.unwrap_or(d.min_m), max.unwrap_or(d.max_m));
            }
        }

        if let Some(n) = self.max_results {
            b = b.max_results(n);
        }

        b.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upstream_json() {
        let raw = r#"{
            "bounds": {"kind": "box", "min_lat": -10, "max_lat": 10, "min_lon": -160, "max_lon": -120},
            "start": "2023-01-01T00:00:00Z",
            "end": "2023-01-31T00:00:00Z",
            "max_depth_m": 500,
            "parameters": ["temperature", "salinity"]
        }"#;

        let req: QueryRequest = serde_json::from_str(raw).unwrap();
        let q = req.into_query().unwrap();

        assert_eq!(q.depth().min_m, 0.0);
        assert_eq!(q.depth().max_m, 500.0);
        assert!(q.parameters().contains(&Parameter::Salinity));
    }

    #[test]
    fn radius_request_keeps_its_shape() {
        let raw = r#"{
            "bounds": {"kind": "radius", "center_lat": 20, "center_lon": -30, "radius_deg": 2},
            "start": "2023-01-01T00:00:00Z",
            "end": "2023-01-02T00:00:00Z",
            "parameters": ["oxygen"]
        }"#;

        let req: QueryRequest = serde_json::from_str(raw).unwrap();
        let q = req.into_query().unwrap();

        assert!(matches!(q.bounds(), SpatialBounds::Radius { .. }));
        assert!(q.signature().as_str().starts_with("radius=20.000000,-30.000000,2.000000"));
    }

    #[test]
    fn inverted_request_fails_validation() {
        let raw = r#"{
            "bounds": {"kind": "box", "min_lat": 0, "max_lat": 1, "min_lon": 0, "max_lon": 1},
            "start": "2023-02-01T00:00:00Z",
            "end": "2023-01-01T00:00:00Z",
            "parameters": ["temperature"]
        }"#;

        let req: QueryRequest = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            req.into_query(),
            Err(QueryError::InvertedTimeRange { .. })
        ));
    }
}
