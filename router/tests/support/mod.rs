#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use query_router::cache::ResponseCache;
use query_router::health::{HealthConfig, HealthTracker};
use query_router::measurement::{Measurement, MeasurementRecord, QualityFlag, Source};
use query_router::query::{Parameter, Query};
use query_router::source::{SourceAdapter, SourceError};
use query_router::{FallbackRouter, RoutingPolicy};

/// What a fake source does on its next fetch.
#[derive(Clone, Debug)]
pub enum Behavior {
    Return(Vec<Measurement>),
    /// Never completes.
    Hang,
    Fail(SourceError),
    /// Fetch succeeds, normalization fails.
    Garbage,
}

pub enum FakeRaw {
    Rows(Vec<Measurement>),
    Garbage,
}

/// Scriptable source with call-count instrumentation.
pub struct FakeSource {
    kind: Source,
    latency: Mutex<Duration>,
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(kind: Source, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            kind,
            latency: Mutex::new(Duration::ZERO),
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn live(behavior: Behavior) -> Arc<Self> {
        Self::new(Source::Live, behavior)
    }

    pub fn replica(behavior: Behavior) -> Arc<Self> {
        Self::new(Source::Replica, behavior)
    }

    pub fn with_latency(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        *self.latency.lock() = latency;
        self
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    type Raw = FakeRaw;

    fn kind(&self) -> Source {
        self.kind
    }

    async fn fetch(&self, _query: &Query, _budget: Duration) -> Result<FakeRaw, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        let behavior = self.behavior.lock().clone();

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match behavior {
            Behavior::Return(ms) => Ok(FakeRaw::Rows(ms)),
            Behavior::Hang => std::future::pending().await,
            Behavior::Fail(e) => Err(e),
            Behavior::Garbage => Ok(FakeRaw::Garbage),
        }
    }

    fn normalize(&self, raw: FakeRaw, _query: &Query) -> Result<Vec<Measurement>, SourceError> {
        match raw {
            FakeRaw::Rows(ms) => Ok(ms),
            FakeRaw::Garbage => Err(SourceError::MalformedResponse("unexpected payload".into())),
        }
    }
}

pub fn jan(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, day, hour, 0, 0).unwrap()
}

pub fn measurement(platform: &str, at: DateTime<Utc>, lat: f64, lon: f64, temp: f64) -> Measurement {
    Measurement::try_from(MeasurementRecord {
        latitude: lat,
        longitude: lon,
        depth_m: 5.0,
        observed_at: at,
        quality: QualityFlag::Good,
        platform_id: platform.to_string(),
        values: BTreeMap::from([
            (Parameter::Temperature, Some(temp)),
            (Parameter::Salinity, Some(34.9)),
        ]),
    })
    .unwrap()
}

/// Three temperature readings inside the Pacific box in January 2023.
pub fn three_rows() -> Vec<Measurement> {
    vec![
        measurement("5904321", jan(10, 6), 1.5, -140.0, 27.4),
        measurement("5904400", jan(12, 0), -3.0, -150.5, 26.1),
        measurement("5904322", jan(10, 6), 0.5, -135.0, 27.9),
    ]
}

pub fn pacific_query() -> Query {
    pacific_query_max(500)
}

/// Same window, different signature per `max_results`.
pub fn pacific_query_max(max_results: usize) -> Query {
    Query::builder()
        .bbox(-10.0, 10.0, -170.0, -120.0)
        .time_range(jan(1, 0), Utc.with_ymd_and_hms(2023, 1, 31, 23, 59, 59).unwrap())
        .parameter(Parameter::Temperature)
        .max_results(max_results)
        .build()
        .unwrap()
}

pub fn policy() -> RoutingPolicy {
    RoutingPolicy {
        total_budget: Duration::from_secs(4),
        live_budget: Duration::from_secs(3),
        live_ttl: Duration::from_secs(30 * 60),
        replica_ttl: Duration::from_secs(5 * 60),
    }
}

pub fn health_config() -> HealthConfig {
    HealthConfig {
        failure_threshold: 3,
        cooldown: Duration::from_secs(60),
        backoff_multiplier: 2.0,
        max_cooldown: Duration::from_secs(600),
    }
}

pub type FakeRouter = FallbackRouter<FakeSource, FakeSource>;

pub fn router(live: &Arc<FakeSource>, replica: &Arc<FakeSource>) -> FakeRouter {
    FallbackRouter::new(
        live.clone(),
        replica.clone(),
        Arc::new(HealthTracker::new(health_config())),
        Arc::new(ResponseCache::new(1_024)),
        policy(),
    )
}
