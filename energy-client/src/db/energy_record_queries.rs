use anyhow::Result;
use sqlx::PgPool;

use crate::db::{Page, RecordQuery};
use crate::domain::EnergyRecord;

/// Keyed layout of the `energy_records` table: `site_id` partitions, `ts` sorts,
/// and the primary key makes upserts idempotent.
pub const CREATE_ENERGY_RECORDS: &str = r#"
    CREATE TABLE IF NOT EXISTS energy_records (
        site_id              TEXT        NOT NULL,
        ts                   TIMESTAMPTZ NOT NULL,
        energy_generated_kwh NUMERIC     NOT NULL,
        energy_consumed_kwh  NUMERIC     NOT NULL,
        net_energy_kwh       NUMERIC     NOT NULL,
        anomaly              BOOLEAN     NOT NULL,
        PRIMARY KEY (site_id, ts)
    )
"#;

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(CREATE_ENERGY_RECORDS).execute(pool).await?;
    Ok(())
}

/// Insert or overwrite the entry at `(site_id, ts)`.
pub async fn upsert_record(pool: &PgPool, record: &EnergyRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO energy_records
            (site_id, ts, energy_generated_kwh, energy_consumed_kwh, net_energy_kwh, anomaly)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (site_id, ts) DO UPDATE SET
            energy_generated_kwh = EXCLUDED.energy_generated_kwh,
            energy_consumed_kwh  = EXCLUDED.energy_consumed_kwh,
            net_energy_kwh       = EXCLUDED.net_energy_kwh,
            anomaly              = EXCLUDED.anomaly
        "#,
    )
    .bind(&record.site_id)
    .bind(record.timestamp)
    .bind(record.energy_generated_kwh)
    .bind(record.energy_consumed_kwh)
    .bind(record.net_energy_kwh)
    .bind(record.anomaly)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch one time-ordered page of a site's records.
pub async fn records_page(pool: &PgPool, query: &RecordQuery) -> Result<Page<EnergyRecord>> {
    let limit = query.limit();

    let rows = sqlx::query_as::<_, EnergyRecord>(
        r#"
        SELECT
            site_id,
            ts,
            energy_generated_kwh,
            energy_consumed_kwh,
            net_energy_kwh,
            anomaly
        FROM energy_records
        WHERE site_id = $1
          AND ($2::timestamptz IS NULL OR ts >= $2)
          AND ($3::timestamptz IS NULL OR ts <= $3)
          AND ($4::timestamptz IS NULL OR ts >  $4)
          AND (NOT $5 OR anomaly)
        ORDER BY ts
        LIMIT $6
        "#,
    )
    .bind(&query.site_id)
    .bind(query.start)
    .bind(query.end)
    .bind(query.after.map(|t| t.0))
    .bind(query.anomalies_only)
    .bind((limit + 1) as i64)
    .fetch_all(pool)
    .await?;

    Ok(Page::from_overfetch(rows, limit))
}

/// Unordered read across all sites, for administrative views only.
pub async fn scan_records(pool: &PgPool, limit: usize) -> Result<Vec<EnergyRecord>> {
    let rows = sqlx::query_as::<_, EnergyRecord>(
        r#"
        SELECT
            site_id,
            ts,
            energy_generated_kwh,
            energy_consumed_kwh,
            net_energy_kwh,
            anomaly
        FROM energy_records
        LIMIT $1
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
