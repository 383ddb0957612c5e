use solar_client::{
    db::history_queries,
    domain::{GenerationDay, MeterDay},
};
use sqlx::{Connection, PgConnection};
use time::Date;

use crate::{
    errors::{FusionError, FusionResult},
    writer::DailyStore,
};

/// [`DailyStore`] over Postgres. Each operation opens its own connection
/// and closes it before returning, so no connection outlives a month.
pub struct PgDailyStore {
    database_url: String,
}

impl PgDailyStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    async fn connect(&self) -> FusionResult<PgConnection> {
        PgConnection::connect(&self.database_url)
            .await
            .map_err(|e| FusionError::Storage(format!("connect: {e}")))
    }
}

async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "closing storage connection failed");
    }
}

fn storage(context: &str, e: anyhow::Error) -> FusionError {
    FusionError::Storage(format!("{context}: {e:#}"))
}

#[async_trait::async_trait]
impl DailyStore for PgDailyStore {
    async fn latest_generation_date(&self, plant_code: &str) -> FusionResult<Option<Date>> {
        let mut conn = self.connect().await?;
        let res = history_queries::latest_generation_date(&mut conn, plant_code).await;
        close(conn).await;
        res.map_err(|e| storage("latest generation date", e))
    }

    async fn upsert_generation(&self, rows: &[GenerationDay]) -> FusionResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect().await?;
        let res = history_queries::upsert_generation_days(&mut conn, rows).await;
        close(conn).await;
        res.map_err(|e| storage("upsert generation", e))
    }

    async fn upsert_meter(&self, rows: &[MeterDay]) -> FusionResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect().await?;
        let res = history_queries::upsert_meter_days(&mut conn, rows).await;
        close(conn).await;
        res.map_err(|e| storage("upsert meter", e))
    }
}
