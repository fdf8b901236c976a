use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::measurement::{Measurement, MeasurementRecord, QualityFlag};
use crate::query::Parameter;
use crate::source::SourceError;
use crate::source::live::types::Table;

const LAT: &[&str] = &["latitude", "lat"];
const LON: &[&str] = &["longitude", "lon"];
const TIME: &[&str] = &["time"];
const PLATFORM: &[&str] = &["platform_number", "platform_id", "wmo"];
const DEPTH: &[&str] = &["depth"];
const PRES: &[&str] = &["pres", "pressure"];
const QUALITY: &[&str] = &["quality_flag"];

fn aliases(p: Parameter) -> &'static [&'static str] {
    match p {
        Parameter::Temperature => &["temp", "temperature"],
        Parameter::Salinity => &["psal", "salinity"],
        Parameter::Pressure => PRES,
        Parameter::Oxygen => &["doxy", "oxygen"],
        Parameter::Chlorophyll => &["chla", "chlorophyll"],
    }
}

/// Column positions resolved once per table.
struct Layout {
    lat: usize,
    lon: usize,
    time: usize,
    platform: usize,
    depth: Option<usize>,
    pres: Option<usize>,
    quality: Option<usize>,
    params: Vec<(Parameter, usize)>,
    width: usize,
}

impl Layout {
    fn resolve(columns: &[String]) -> Result<Self, SourceError> {
        let lower: Vec<String> = columns.iter().map(|c| c.to_ascii_lowercase()).collect();
        let find = |names: &[&str]| names.iter().find_map(|n| lower.iter().position(|c| c == n));
        let require = |what: &str, names: &[&str]| {
            find(names).ok_or_else(|| SourceError::MalformedResponse(format!("missing column: {what}")))
        };

        Ok(Self {
            lat: require("latitude", LAT)?,
            lon: require("longitude", LON)?,
            time: require("time", TIME)?,
            platform: require("platform", PLATFORM)?,
            depth: find(DEPTH),
            pres: find(PRES),
            quality: find(QUALITY),
            params: Parameter::ALL
                .into_iter()
                .filter_map(|p| find(aliases(p)).map(|i| (p, i)))
                .collect(),
            width: columns.len(),
        })
    }
}

/// Decodes an ERDDAP table into measurements.
///
/// Rows lacking a position, time, or platform are skipped (ERDDAP fills gaps
/// with nulls). Anything structurally wrong fails the whole payload: a partial
/// decode is never returned.
pub fn normalize_table(table: &Table) -> Result<Vec<Measurement>, SourceError> {
    if table.rows.is_empty() {
        return Ok(Vec::new());
    }

    let layout = Layout::resolve(&table.column_names)?;
    let mut out = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;

    for (idx, row) in table.rows.iter().enumerate() {
        if row.len() != layout.width {
            return Err(SourceError::MalformedResponse(format!(
                "row {idx} has {} cells, expected {}",
                row.len(),
                layout.width
            )));
        }

        let (Some(lat), Some(lon), Some(at), Some(platform)) = (
            number(&row[layout.lat], idx)?,
            number(&row[layout.lon], idx)?,
            timestamp(&row[layout.time], idx)?,
            text(&row[layout.platform]),
        ) else {
            skipped += 1;
            continue;
        };

        let pres = match layout.pres {
            Some(i) => number(&row[i], idx)?,
            None => None,
        };
        // Pressure in decibars is within a few percent of depth in meters.
        let depth_m = match layout.depth {
            Some(i) => number(&row[i], idx)?.or(pres),
            None => pres,
        }
        .unwrap_or(0.0);

        let quality = match layout.quality.map(|i| number(&row[i], idx)).transpose()? {
            Some(Some(code)) => {
                QualityFlag::from_code(code as i64).unwrap_or(QualityFlag::Questionable)
            }
            _ => QualityFlag::Good,
        };

        let mut values = BTreeMap::new();
        for (p, i) in &layout.params {
            values.insert(*p, number(&row[*i], idx)?);
        }

        let m = Measurement::try_from(MeasurementRecord {
            latitude: lat,
            longitude: lon,
            depth_m,
            observed_at: at,
            quality,
            platform_id: platform,
            values,
        })
        .map_err(|e| SourceError::MalformedResponse(format!("row {idx}: {e}")))?;

        out.push(m);
    }

    if skipped > 0 {
        debug!(skipped, kept = out.len(), "skipped incomplete erddap rows");
    }

    Ok(out)
}

fn number(v: &Value, row: usize) -> Result<Option<f64>, SourceError> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| SourceError::MalformedResponse(format!("row {row}: bad number {n}"))),
        Value::String(s) if s.trim().is_empty() || s.eq_ignore_ascii_case("nan") => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| SourceError::MalformedResponse(format!("row {row}: not a number: {s:?}"))),
        other => Err(SourceError::MalformedResponse(format!(
            "row {row}: expected number, got {other}"
        ))),
    }
}

fn timestamp(v: &Value, row: usize) -> Result<Option<DateTime<Utc>>, SourceError> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => {
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Ok(Some(t.with_timezone(&Utc)));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|n| Some(n.and_utc()))
                .map_err(|_| SourceError::MalformedResponse(format!("row {row}: bad time {s:?}")))
        }
        // Epoch seconds.
        Value::Number(n) => n
            .as_f64()
            .and_then(|secs| DateTime::from_timestamp(secs.trunc() as i64, 0))
            .map(Some)
            .ok_or_else(|| SourceError::MalformedResponse(format!("row {row}: bad time {n}"))),
        other => Err(SourceError::MalformedResponse(format!(
            "row {row}: expected time, got {other}"
        ))),
    }
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
