use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Replica measurements
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS ocean_measurements (
  platform_id TEXT NOT NULL,
  measured_at_ms BIGINT NOT NULL,
  latitude REAL NOT NULL CHECK (latitude BETWEEN -90 AND 90),
  longitude REAL NOT NULL CHECK (longitude BETWEEN -180 AND 180),
  depth_m REAL NOT NULL CHECK (depth_m >= 0),
  temperature REAL,
  salinity REAL,
  pressure REAL,
  oxygen REAL,
  chlorophyll REAL,
  quality_flag BIGINT NOT NULL DEFAULT 1 CHECK (quality_flag IN (1,2,3)),
  PRIMARY KEY (platform_id, measured_at_ms, depth_m)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_ocean_measurements_spatial ON ocean_measurements(latitude, longitude);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_ocean_measurements_temporal ON ocean_measurements(measured_at_ms);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_ocean_measurements_depth ON ocean_measurements(depth_m);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
