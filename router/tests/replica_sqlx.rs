mod support;

use std::sync::Arc;
use std::time::Duration;

use sqlx::AnyPool;
use uuid::Uuid;

use query_router::cache::ResponseCache;
use query_router::db::Db;
use query_router::health::HealthTracker;
use query_router::measurement::Source;
use query_router::measurement::normalizer::{finalize, is_canonically_ordered};
use query_router::query::{Parameter, Query};
use query_router::source::replica::{
    MeasurementRepository, RangeFilter, ReplicaAdapter, SqlxMeasurementRepository,
};
use query_router::source::{SourceAdapter, SourceError};
use query_router::FallbackRouter;

use support::*;

/// Isolated in-memory SQLite database. The unique name keeps parallel tests
/// apart while letting the pool's connections share one cache.
async fn setup_db() -> Db {
    let url = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let db = Db::connect(&url).await.unwrap();
    db.migrate().await.unwrap();
    db
}

async fn seeded() -> (Db, Arc<SqlxMeasurementRepository>) {
    let db = setup_db().await;
    let repo = Arc::new(SqlxMeasurementRepository::new(db.pool.clone()));

    let mut rows = three_rows();
    // Outside the Pacific box.
    rows.push(measurement("6900001", jan(10, 6), 40.0, 10.0, 14.0));
    // Outside the time window.
    rows.push(measurement("6900002", jan(1, 0) - chrono::Duration::days(3), 0.0, -140.0, 27.0));

    assert_eq!(repo.insert_batch(&rows).await.unwrap(), 5);
    (db, repo)
}

async fn insert_raw(pool: &AnyPool, platform: &str, at_ms: i64, quality: i64) {
    sqlx::query(
        r#"
INSERT INTO ocean_measurements (platform_id, measured_at_ms, latitude, longitude, depth_m, temperature, quality_flag)
VALUES (?, ?, 0.0, -140.0, 5.0, 20.0, ?);
"#,
    )
    .bind(platform)
    .bind(at_ms)
    .bind(quality)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn range_query_applies_every_predicate_and_orders() {
    let (_db, repo) = seeded().await;
    let filter = RangeFilter::from(&pacific_query());

    let rows = repo.query_range(&filter, 100).await.unwrap();

    let platforms: Vec<&str> = rows.iter().map(|m| m.platform_id()).collect();
    assert_eq!(platforms, ["5904400", "5904321", "5904322"]);
    assert_eq!(repo.count().await.unwrap(), 5);
}

#[tokio::test]
async fn range_query_requires_a_requested_parameter() {
    let (_db, repo) = seeded().await;
    let q = Query::builder()
        .bbox(-10.0, 10.0, -170.0, -120.0)
        .time_range(jan(1, 0), jan(31, 0))
        .parameter(Parameter::Chlorophyll)
        .build()
        .unwrap();

    let rows = repo.query_range(&RangeFilter::from(&q), 100).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn upsert_replaces_on_same_key() {
    let (_db, repo) = seeded().await;

    let updated = measurement("5904321", jan(10, 6), 1.5, -140.0, 30.0);
    repo.insert_batch(&[updated]).await.unwrap();

    assert_eq!(repo.count().await.unwrap(), 5);
    let rows = repo
        .query_range(&RangeFilter::from(&pacific_query()), 100)
        .await
        .unwrap();
    let row = rows.iter().find(|m| m.platform_id() == "5904321").unwrap();
    assert_eq!(row.value(Parameter::Temperature), Some(30.0));
}

#[tokio::test]
async fn adapter_applies_ceiling_and_skips_invalid_rows() {
    let (db, repo) = seeded().await;
    // Blank platform id, newer than every valid row: stored fine, rejected on read.
    insert_raw(&db.pool, "   ", jan(20, 0).timestamp_millis(), 1).await;

    let adapter = ReplicaAdapter::new(repo);
    let q = pacific_query_max(2);

    let raw = adapter.fetch(&q, Duration::from_secs(1)).await.unwrap();
    // ceiling + 1 valid rows, the rejected one does not take a slot
    assert_eq!(raw.len(), 3);

    let out = finalize(adapter.normalize(raw, &q).unwrap(), &q);
    assert_eq!(out.measurements.len(), 2);
    assert!(out.truncated);
    assert!(out.measurements.iter().all(|m| !m.platform_id().trim().is_empty()));
}

#[tokio::test]
async fn invalid_rows_alone_do_not_mark_truncation() {
    let (db, repo) = seeded().await;
    insert_raw(&db.pool, "   ", jan(20, 0).timestamp_millis(), 1).await;

    let adapter = ReplicaAdapter::new(repo);
    let q = pacific_query_max(3);

    let raw = adapter.fetch(&q, Duration::from_secs(1)).await.unwrap();
    let out = finalize(adapter.normalize(raw, &q).unwrap(), &q);

    assert_eq!(out.measurements.len(), 3);
    assert!(!out.truncated);
}

#[tokio::test]
async fn paging_skips_a_full_page_of_invalid_rows() {
    let (db, repo) = seeded().await;
    for hour in 0..4 {
        insert_raw(&db.pool, "", jan(20, hour).timestamp_millis(), 1).await;
    }

    // Every row of the first page is rejected; the valid ones come after.
    let rows = repo
        .query_range(&RangeFilter::from(&pacific_query()), 3)
        .await
        .unwrap();

    let platforms: Vec<&str> = rows.iter().map(|m| m.platform_id()).collect();
    assert_eq!(platforms, ["5904400", "5904321", "5904322"]);
}

#[tokio::test]
async fn storage_errors_surface_as_storage() {
    let db = setup_db().await;
    sqlx::query("DROP TABLE ocean_measurements;")
        .execute(&db.pool)
        .await
        .unwrap();

    let adapter = ReplicaAdapter::new(Arc::new(SqlxMeasurementRepository::new(db.pool.clone())));
    let err = adapter
        .fetch(&pacific_query(), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Storage(_)));
}

#[tokio::test]
async fn router_falls_back_to_sqlite_replica() {
    let (_db, repo) = seeded().await;

    let live = FakeSource::live(Behavior::Fail(SourceError::Transport("refused".into())));
    let router = FallbackRouter::new(
        live.clone(),
        Arc::new(ReplicaAdapter::new(repo)),
        Arc::new(HealthTracker::new(health_config())),
        Arc::new(ResponseCache::new(64)),
        policy(),
    );

    let res = router.resolve(&pacific_query()).await.unwrap();

    assert_eq!(res.source, Source::Replica);
    assert_eq!(res.len(), 3);
    assert!(is_canonically_ordered(&res.measurements));
    assert_eq!(live.calls(), 1);

    // Same data served live is indistinguishable apart from the tag.
    let live_router = router_with_live_rows();
    let live_res = live_router.resolve(&pacific_query()).await.unwrap();
    assert_eq!(live_res.source, Source::Live);
    assert_eq!(live_res.measurements, res.measurements);
}

fn router_with_live_rows() -> FakeRouter {
    router(
        &FakeSource::live(Behavior::Return(three_rows())),
        &FakeSource::replica(Behavior::Return(vec![])),
    )
}
