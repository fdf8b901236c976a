use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use crate::health::HealthConfig;
use crate::router::RoutingPolicy;

#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Replica store connection string.
    pub database_url: String,

    // =========================
    // Live provider
    // =========================
    /// ERDDAP server root, e.g. `https://host/erddap`.
    pub live_base_url: String,

    /// tabledap dataset id queried for measurements.
    pub live_dataset: String,

    /// Optional bearer token sent with every live request.
    pub live_api_key: Option<String>,

    // =========================
    // Budgets and cache
    // =========================
    /// Hard ceiling on one `resolve` call (`T_total`).
    pub total_budget: Duration,

    /// Sub-budget for the live attempt (`T_live`). Must be below `total_budget`
    /// so the replica always gets a share.
    pub live_budget: Duration,

    /// TTL for results served by the live provider.
    pub live_cache_ttl: Duration,

    /// TTL for replica results, shorter since the replica may be enriched later.
    pub replica_cache_ttl: Duration,

    /// Upper bound on cached signatures.
    pub cache_max_entries: usize,

    /// Interval of the background cache sweep.
    pub sweep_interval: Duration,

    // =========================
    // Circuit breaker
    // =========================
    /// Consecutive live failures that open the circuit (`N`).
    pub failure_threshold: u32,

    /// First cooldown once open (`T_cooldown`).
    pub cooldown: Duration,

    /// Cooldown growth per failed half-open probe.
    pub backoff_multiplier: f64,

    /// Cap on the grown cooldown.
    pub max_cooldown: Duration,

    /// `APP_ENV=production` switches logs to JSON.
    pub json_logs: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ocean_replica.db?mode=rwc".to_string(),

            live_base_url: "https://coastwatch.pfeg.noaa.gov/erddap".to_string(),
            live_dataset: "ArgoFloats".to_string(),
            live_api_key: None,

            total_budget: Duration::from_millis(4_000),
            live_budget: Duration::from_millis(3_000),
            live_cache_ttl: Duration::from_secs(30 * 60),
            replica_cache_ttl: Duration::from_secs(5 * 60),
            cache_max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),

            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_cooldown: Duration::from_secs(600),

            json_logs: false,
        }
    }
}

impl RouterConfig {
    /// Defaults overridden by whatever is set in the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Self::default();

        let cfg = Self {
            database_url: env_string("DATABASE_URL").unwrap_or(d.database_url),

            live_base_url: env_string("LIVE_BASE_URL").unwrap_or(d.live_base_url),
            live_dataset: env_string("LIVE_DATASET").unwrap_or(d.live_dataset),
            live_api_key: env_string("LIVE_API_KEY"),

            total_budget: env_parse("ROUTER_T_TOTAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.total_budget),
            live_budget: env_parse("ROUTER_T_LIVE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.live_budget),
            live_cache_ttl: env_parse("ROUTER_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.live_cache_ttl),
            replica_cache_ttl: env_parse("ROUTER_REPLICA_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.replica_cache_ttl),
            cache_max_entries: env_parse("ROUTER_CACHE_MAX_ENTRIES")?.unwrap_or(d.cache_max_entries),
            sweep_interval: env_parse("ROUTER_SWEEP_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),

            failure_threshold: env_parse("ROUTER_FAILURE_THRESHOLD")?.unwrap_or(d.failure_threshold),
            cooldown: env_parse("ROUTER_COOLDOWN_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.cooldown),
            backoff_multiplier: d.backoff_multiplier,
            max_cooldown: d.max_cooldown,

            json_logs: env_string("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.live_budget >= self.total_budget {
            bail!(
                "live budget ({:?}) must be strictly less than total budget ({:?})",
                self.live_budget,
                self.total_budget
            );
        }
        if self.failure_threshold < 1 {
            bail!("failure threshold must be at least 1");
        }
        if self.cooldown.is_zero() {
            bail!("circuit cooldown must be non-zero");
        }
        if self.sweep_interval.is_zero() {
            bail!("cache sweep interval must be non-zero");
        }
        Ok(())
    }

    pub fn policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            total_budget: self.total_budget,
            live_budget: self.live_budget,
            live_ttl: self.live_cache_ttl,
            replica_ttl: self.replica_cache_ttl,
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            failure_threshold: self.failure_threshold,
            cooldown: self.cooldown,
            backoff_multiplier: self.backoff_multiplier,
            max_cooldown: self.max_cooldown.max(self.cooldown),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(key)
        .map(|v| v.trim().parse::<T>().with_context(|| format!("invalid value for {key}: {v:?}")))
        .transpose()
}
