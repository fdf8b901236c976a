use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::measurement::{Measurement, Source};
use crate::query::{Parameter, Query};
use crate::source::live::normalize::normalize_table;
use crate::source::live::types::{Table, TableEnvelope};
use crate::source::{SourceAdapter, SourceError};

/// ERDDAP answers an empty selection with 404 and this text instead of an
/// empty table.
const NO_MATCHING_RESULTS: &str = "no matching results";

/// HTTP client for one ERDDAP tabledap dataset.
///
/// Holds a pooled reqwest client; the per-request timeout comes from the
/// caller's budget, so the client itself carries no global timeout.
#[derive(Clone)]
pub struct ErddapClient {
    http: Client,
    base_url: String,
    dataset: String,
    api_key: Option<String>,
}

impl ErddapClient {
    pub fn new(
        base_url: impl Into<String>,
        dataset: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, SourceError> {
        let http = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dataset: dataset.into(),
            api_key,
        })
    }

    /// `<base>/tabledap/<dataset>.json?<vars>&<constraints>`
    ///
    /// No row limit is pushed down: `orderByLimit` keeps the first rows in
    /// ascending order, while results are ranked newest first.
    pub fn request_url(&self, query: &Query) -> String {
        let mut vars = vec!["platform_number", "time", "latitude", "longitude", "pres"];
        for p in query.parameters() {
            if let Some(col) = variable_for(*p) {
                vars.push(col);
            }
        }

        let bbox = query.bounds().envelope();
        let time = query.time();
        let depth = query.depth();

        format!(
            "{}/tabledap/{}.json?{}\
             &time>={}&time<={}\
             &latitude>={}&latitude<={}\
             &longitude>={}&longitude<={}\
             &pres>={}&pres<={}",
            self.base_url,
            self.dataset,
            vars.join(","),
            time.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            time.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            bbox.min_lat,
            bbox.max_lat,
            bbox.min_lon,
            bbox.max_lon,
            depth.min_m,
            depth.max_m,
        )
    }

    #[instrument(
        skip(self, query),
        fields(dataset = %self.dataset, budget_ms = budget.as_millis() as u64),
        level = "debug"
    )]
    pub async fn fetch_table(&self, query: &Query, budget: Duration) -> Result<Table, SourceError> {
        let url = self.request_url(query);

        let mut req = self.http.get(&url).timeout(budget);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SourceError::from_http(e, budget))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| SourceError::from_http(e, budget))?;

        if status == StatusCode::NOT_FOUND
            && String::from_utf8_lossy(&body)
                .to_ascii_lowercase()
                .contains(NO_MATCHING_RESULTS)
        {
            debug!("erddap reported an empty selection");
            return Ok(Table::empty());
        }

        if !status.is_success() {
            return Err(SourceError::Transport(format!(
                "erddap returned HTTP {status}"
            )));
        }

        let envelope: TableEnvelope = serde_json::from_slice(&body)
            .map_err(|e| SourceError::MalformedResponse(e.to_string()))?;

        debug!(rows = envelope.table.rows.len(), "erddap table fetched");

        Ok(envelope.table)
    }
}

#[async_trait]
impl SourceAdapter for ErddapClient {
    type Raw = Table;

    fn kind(&self) -> Source {
        Source::Live
    }

    async fn fetch(&self, query: &Query, budget: Duration) -> Result<Table, SourceError> {
        self.fetch_table(query, budget).await
    }

    fn normalize(&self, raw: Table, _query: &Query) -> Result<Vec<Measurement>, SourceError> {
        normalize_table(&raw)
    }
}

/// Dataset variable carrying a parameter. Pressure is always requested since
/// it doubles as depth.
fn variable_for(p: Parameter) -> Option<&'static str> {
    match p {
        Parameter::Temperature => Some("temp"),
        Parameter::Salinity => Some("psal"),
        Parameter::Pressure => None,
        Parameter::Oxygen => Some("doxy"),
        Parameter::Chlorophyll => Some("chla"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn url_carries_variables_and_constraints() {
        let client = ErddapClient::new("https://erddap.example/erddap/", "ArgoFloats", None).unwrap();
        let q = Query::builder()
            .bbox(-10.0, 10.0, -160.0, -120.0)
            .time_range(
                Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2023, 1, 31, 0, 0, 0).unwrap(),
            )
            .depth_range(0.0, 500.0)
            .parameters([Parameter::Salinity, Parameter::Temperature, Parameter::Pressure])
            .build()
            .unwrap();

        let url = client.request_url(&q);

        assert!(url.starts_with(
            "https://erddap.example/erddap/tabledap/ArgoFloats.json?platform_number,time,latitude,longitude,pres,temp,psal&"
        ));
        assert!(url.contains("&time>=2023-01-01T00:00:00Z&time<=2023-01-31T00:00:00Z"));
        assert!(url.contains("&latitude>=-10&latitude<=10"));
        assert!(url.contains("&longitude>=-160&longitude<=-120"));
        assert!(url.ends_with("&pres>=0&pres<=500"));
    }
}
