use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use crate::measurement::Measurement;
use crate::query::Parameter;
use crate::source::replica::repository::{MeasurementRepository, MeasurementRow, RangeFilter};

/// SQLx-backed implementation of MeasurementRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxMeasurementRepository {
    pool: AnyPool,
}

impl SqlxMeasurementRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MeasurementRepository for SqlxMeasurementRepository {
    async fn query_range(
        &self,
        filter: &RangeFilter,
        limit: usize,
    ) -> anyhow::Result<Vec<Measurement>> {
        let sql = format!(
            r#"
SELECT
  platform_id, measured_at_ms,
  latitude, longitude, depth_m,
  temperature, salinity, pressure, oxygen, chlorophyll,
  quality_flag
FROM ocean_measurements
WHERE latitude BETWEEN ? AND ?
  AND longitude BETWEEN ? AND ?
  AND measured_at_ms BETWEEN ? AND ?
  AND depth_m BETWEEN ? AND ?
  AND ({})
ORDER BY measured_at_ms DESC, platform_id ASC, depth_m ASC, latitude ASC, longitude ASC
LIMIT ? OFFSET ?;
"#,
            any_measured(&filter.parameters)?
        );

        let page = i64::try_from(limit).context("limit too large")?;
        let mut out = Vec::with_capacity(limit);
        let mut offset = 0i64;

        // Skipped rows do not count toward `limit`, so keep paging until it
        // is met or the store runs out.
        while out.len() < limit {
            let rows = sqlx::query(&sql)
                .bind(filter.min_lat)
                .bind(filter.max_lat)
                .bind(filter.min_lon)
                .bind(filter.max_lon)
                .bind(filter.start_ms)
                .bind(filter.end_ms)
                .bind(filter.min_depth_m)
                .bind(filter.max_depth_m)
                .bind(page)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .context("range query on ocean_measurements failed")?;

            let fetched = rows.len();
            for r in rows {
                let decoded = map_row(&r).and_then(|row| {
                    let platform_id = row.platform_id.clone();
                    row.into_measurement()
                        .with_context(|| format!("invalid row for platform {platform_id:?}"))
                });
                match decoded {
                    Ok(m) => out.push(m),
                    Err(e) => {
                        // poison-row resilience: skip but don't fail the batch
                        tracing::warn!(error = %format!("{e:#}"), "skipping invalid measurement row");
                    }
                }
            }

            if fetched < limit {
                break;
            }
            offset += page;
        }

        out.truncate(limit);
        Ok(out)
    }

    async fn insert_batch(&self, batch: &[Measurement]) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for m in batch {
            let row = MeasurementRow::from_measurement(m);

            let res = sqlx::query(
                r#"
INSERT INTO ocean_measurements (
  platform_id, measured_at_ms,
  latitude, longitude, depth_m,
  temperature, salinity, pressure, oxygen, chlorophyll,
  quality_flag
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (platform_id, measured_at_ms, depth_m) DO UPDATE SET
  latitude = excluded.latitude,
  longitude = excluded.longitude,
  temperature = excluded.temperature,
  salinity = excluded.salinity,
  pressure = excluded.pressure,
  oxygen = excluded.oxygen,
  chlorophyll = excluded.chlorophyll,
  quality_flag = excluded.quality_flag;
"#,
            )
            .bind(row.platform_id)
            .bind(row.measured_at_ms)
            .bind(row.latitude)
            .bind(row.longitude)
            .bind(row.depth_m)
            .bind(row.temperature)
            .bind(row.salinity)
            .bind(row.pressure)
            .bind(row.oxygen)
            .bind(row.chlorophyll)
            .bind(row.quality_flag)
            .execute(&mut *tx)
            .await
            .context("insert into ocean_measurements failed")?;

            written += res.rows_affected();
        }

        tx.commit().await?;

        tracing::info!(written, "replica batch stored");
        Ok(written)
    }

    async fn count(&self) -> anyhow::Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM ocean_measurements;")
            .fetch_one(&self.pool)
            .await?;

        let n: i64 = row.try_get("n")?;
        u64::try_from(n).map_err(|_| anyhow!("negative row count: {n}"))
    }
}

/* =========================
Row mapping
========================= */

fn map_row(r: &sqlx::any::AnyRow) -> anyhow::Result<MeasurementRow> {
    Ok(MeasurementRow {
        platform_id: r.try_get("platform_id").context("platform_id")?,
        measured_at_ms: r.try_get("measured_at_ms").context("measured_at_ms")?,
        latitude: r.try_get("latitude").context("latitude")?,
        longitude: r.try_get("longitude").context("longitude")?,
        depth_m: r.try_get("depth_m").context("depth_m")?,
        temperature: r.try_get("temperature")?,
        salinity: r.try_get("salinity")?,
        pressure: r.try_get("pressure")?,
        oxygen: r.try_get("oxygen")?,
        chlorophyll: r.try_get("chlorophyll")?,
        quality_flag: r.try_get("quality_flag").context("quality_flag")?,
    })
}

/// `temperature IS NOT NULL OR ...` for the requested parameters. Column
/// names come from a closed enum, never from caller text.
fn any_measured(params: &[Parameter]) -> anyhow::Result<String> {
    if params.is_empty() {
        return Err(anyhow!("range filter without parameters"));
    }

    Ok(params
        .iter()
        .map(|p| format!("{} IS NOT NULL", p.as_str()))
        .collect::<Vec<_>>()
        .join(" OR "))
}
