mod cli;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::Parser;
use serde_json::json;

use common::logger::init_logger;
use query_router::FallbackRouter;
use query_router::cache::{ResponseCache, spawn_sweeper};
use query_router::config::RouterConfig;
use query_router::db::Db;
use query_router::health::HealthTracker;
use query_router::measurement::Measurement;
use query_router::query::{Parameter, Query};
use query_router::source::SourceAdapter;
use query_router::source::live::ErddapClient;
use query_router::source::replica::{
    MeasurementRepository, ReplicaAdapter, SqlxMeasurementRepository,
};

use cli::{Cli, Command, ResolveArgs};

type Router = FallbackRouter<ErddapClient, ReplicaAdapter>;

/// Connects to the replica store and runs migrations.
async fn init_replica(cfg: &RouterConfig) -> anyhow::Result<Arc<SqlxMeasurementRepository>> {
    let db = Db::connect(&cfg.database_url)
        .await
        .with_context(|| format!("connecting to replica at {}", cfg.database_url))?;
    db.migrate().await.context("replica migration failed")?;

    Ok(Arc::new(SqlxMeasurementRepository::new(db.pool.clone())))
}

fn build_router(
    cfg: &RouterConfig,
    repo: Arc<SqlxMeasurementRepository>,
) -> anyhow::Result<(Router, Arc<ResponseCache>)> {
    let live = ErddapClient::new(
        cfg.live_base_url.clone(),
        cfg.live_dataset.clone(),
        cfg.live_api_key.clone(),
    )?;
    let cache = Arc::new(ResponseCache::new(cfg.cache_max_entries));

    let router = FallbackRouter::new(
        Arc::new(live),
        Arc::new(ReplicaAdapter::new(repo)),
        Arc::new(HealthTracker::new(cfg.health_config())),
        cache.clone(),
        cfg.policy(),
    );

    Ok((router, cache))
}

async fn run_resolve(
    cfg: &RouterConfig,
    repo: Arc<SqlxMeasurementRepository>,
    args: &ResolveArgs,
) -> anyhow::Result<()> {
    let request = args.to_request()?;
    let (router, cache) = build_router(cfg, repo)?;
    let _sweeper = spawn_sweeper(&cache, cfg.sweep_interval);

    let result = tokio::select! {
        r = router.resolve_request(request) => r?,
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    };

    let out = json!({
        "result": &*result,
        "extent": result.extent(),
        "status": router.status(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);

    Ok(())
}

async fn run_status(
    cfg: &RouterConfig,
    repo: Arc<SqlxMeasurementRepository>,
    probe: bool,
) -> anyhow::Result<()> {
    let replica_rows = repo.count().await?;

    // Circuit state and counters live inside a running router; a one-shot
    // process can only report the replica and, on request, live reachability.
    let live_probe = if probe {
        Some(probe_live(cfg).await?)
    } else {
        None
    };

    let out = status_report(cfg, replica_rows, live_probe);
    println!("{}", serde_json::to_string_pretty(&out)?);

    Ok(())
}

fn status_report(
    cfg: &RouterConfig,
    replica_rows: u64,
    live_probe: Option<serde_json::Value>,
) -> serde_json::Value {
    json!({
        "live_base_url": cfg.live_base_url,
        "live_dataset": cfg.live_dataset,
        "replica_rows": replica_rows,
        "live_probe": live_probe,
    })
}

/// One small request against the live provider: last day, one degree box.
async fn probe_live(cfg: &RouterConfig) -> anyhow::Result<serde_json::Value> {
    let client = ErddapClient::new(
        cfg.live_base_url.clone(),
        cfg.live_dataset.clone(),
        cfg.live_api_key.clone(),
    )?;
    let now = Utc::now();
    let query = Query::builder()
        .bbox(-0.5, 0.5, -140.5, -139.5)
        .time_range(now - chrono::Duration::days(1), now)
        .parameter(Parameter::Temperature)
        .max_results(1)
        .build()?;

    let started = Instant::now();
    let outcome = client.fetch(&query, cfg.live_budget).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    Ok(match outcome {
        Ok(table) => json!({ "reachable": true, "rows": table.rows.len(), "elapsed_ms": elapsed_ms }),
        Err(e) => json!({ "reachable": false, "error": e.to_string(), "kind": e.kind(), "elapsed_ms": elapsed_ms }),
    })
}

async fn run_ingest(repo: Arc<SqlxMeasurementRepository>, path: &std::path::Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<serde_json::Value> =
        serde_json::from_slice(&raw).context("ingest file must be a JSON array")?;

    let total = records.len();
    let mut batch: Vec<Measurement> = Vec::with_capacity(total);
    for (idx, v) in records.into_iter().enumerate() {
        match serde_json::from_value::<Measurement>(v) {
            Ok(m) => batch.push(m),
            Err(e) => tracing::warn!(index = idx, error = %e, "skipping invalid record"),
        }
    }

    let written = repo.insert_batch(&batch).await?;
    tracing::info!(total, written, skipped = total - batch.len(), "ingest complete");

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "read": total,
            "written": written,
            "skipped": total - batch.len(),
            "replica_rows": repo.count().await?,
        }))?
    );

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = RouterConfig::from_env()?;
    init_logger("query-router", cfg.json_logs);

    tracing::debug!(
        total_budget_ms = cfg.total_budget.as_millis() as u64,
        live_budget_ms = cfg.live_budget.as_millis() as u64,
        "configuration loaded"
    );

    let repo = init_replica(&cfg).await?;

    match &cli.command {
        Command::Resolve(args) => run_resolve(&cfg, repo, args).await,
        Command::Status { probe } => run_status(&cfg, repo, *probe).await,
        Command::Ingest { path } => run_ingest(repo, path).await,
    }
}
