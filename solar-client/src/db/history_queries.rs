use anyhow::Result;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use time::Date;

use crate::domain::{GenerationDay, MeterDay};

/// Latest day with a stored generation row for `plant_code`, if any.
pub async fn latest_generation_date(conn: &mut PgConnection, plant_code: &str) -> Result<Option<Date>> {
    let latest: Option<Date> = sqlx::query_scalar(
        r#"
        SELECT max(ddate)
        FROM raw.fs_history_power
        WHERE plant_code = $1
        "#,
    )
    .bind(plant_code)
    .fetch_one(conn)
    .await?;

    Ok(latest)
}

/// Upsert daily generation rows. Conflicting `(plant_code, ddate)` rows are overwritten.
///
/// Callers must not pass two rows with the same key in one batch; Postgres
/// refuses to update the same row twice within a single statement.
pub async fn upsert_generation_days(conn: &mut PgConnection, rows: &[GenerationDay]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut builder =
        QueryBuilder::<Postgres>::new("INSERT INTO raw.fs_history_power (plant_code, ddate, day_kwh, payload_json) ");

    builder.push_values(rows, |mut b, g| {
        b.push_bind(&g.plant_code)
            .push_bind(g.ddate)
            .push_bind(g.day_kwh)
            .push_bind(&g.payload_json);
    });
    builder.push(
        " ON CONFLICT (plant_code, ddate) DO UPDATE SET \
         day_kwh = EXCLUDED.day_kwh, \
         payload_json = EXCLUDED.payload_json",
    );

    let res = builder.build().execute(conn).await?;
    Ok(res.rows_affected())
}

/// Upsert daily consumption/export rows keyed by `(plant_code, ts_date)`.
pub async fn upsert_meter_days(conn: &mut PgConnection, rows: &[MeterDay]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO raw.fs_meter_energy_daily (ts_date, plant_code, day_use_kwh, day_grid_kwh) ",
    );

    builder.push_values(rows, |mut b, m| {
        b.push_bind(m.ts_date)
            .push_bind(&m.plant_code)
            .push_bind(m.day_use_kwh)
            .push_bind(m.day_grid_kwh);
    });
    builder.push(
        " ON CONFLICT (plant_code, ts_date) DO UPDATE SET \
         day_use_kwh = EXCLUDED.day_use_kwh, \
         day_grid_kwh = EXCLUDED.day_grid_kwh",
    );

    let res = builder.build().execute(conn).await?;
    Ok(res.rows_affected())
}
