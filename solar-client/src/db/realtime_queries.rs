use anyhow::Result;
use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::domain::RealtimeSample;

/// Append realtime samples; a sample already stored for `(ts_utc, plant_code)` is kept as is.
pub async fn insert_realtime_samples(conn: &mut PgConnection, rows: &[RealtimeSample]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO raw.fs_realtime_plants \
         (plant_code, ts_utc, plant_name, power_kw, day_power_kwh, month_power_kwh, total_power_kwh, health) ",
    );

    builder.push_values(rows, |mut b, s| {
        b.push_bind(&s.plant_code)
            .push_bind(s.ts_utc)
            .push_bind(&s.plant_name)
            .push_bind(s.power_kw)
            .push_bind(s.day_power_kwh)
            .push_bind(s.month_power_kwh)
            .push_bind(s.total_power_kwh)
            .push_bind(s.health);
    });
    builder.push(" ON CONFLICT (ts_utc, plant_code) DO NOTHING");

    let res = builder.build().execute(conn).await?;
    Ok(res.rows_affected())
}

/// Record `sample` as the latest known state of its plant.
pub async fn upsert_last_state(conn: &mut PgConnection, sample: &RealtimeSample) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO raw.fs_plants_last
            (plant_code, updated_utc, plant_name, power_kw, day_power_kwh, month_power_kwh, total_power_kwh, health)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (plant_code) DO UPDATE SET
            updated_utc     = EXCLUDED.updated_utc,
            plant_name      = EXCLUDED.plant_name,
            power_kw        = EXCLUDED.power_kw,
            day_power_kwh   = EXCLUDED.day_power_kwh,
            month_power_kwh = EXCLUDED.month_power_kwh,
            total_power_kwh = EXCLUDED.total_power_kwh,
            health          = EXCLUDED.health
        "#,
    )
    .bind(&sample.plant_code)
    .bind(sample.ts_utc)
    .bind(&sample.plant_name)
    .bind(sample.power_kw)
    .bind(sample.day_power_kwh)
    .bind(sample.month_power_kwh)
    .bind(sample.total_power_kwh)
    .bind(sample.health)
    .execute(conn)
    .await?;

    Ok(())
}
