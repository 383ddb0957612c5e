use std::sync::Arc;

use anyhow::Result;
use fusion_backfill::{
    api::FusionApi,
    backfill::{BackfillCursor, CursorSettings, PlantOutcome},
    clock::{cancel_on_ctrl_c, TokioSleeper},
    config::AppConfig,
    metrics_server, observability,
    sinks::PgDailyStore,
    writer::IdempotentWriter,
};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let plants = cfg.plants()?;
    let only = cfg.only_plant();

    let sleeper = Arc::new(TokioSleeper::new(cancel_on_ctrl_c()));
    let api = FusionApi::from_config(&cfg, sleeper.clone());
    let writer = IdempotentWriter::new(PgDailyStore::new(cfg.database.url.clone()), cfg.backfill.dry_run);
    let mut cursor = BackfillCursor::new(api, writer, sleeper, CursorSettings::from_config(&cfg));

    let summaries = cursor.run(&plants, only.as_deref(), OffsetDateTime::now_utc().date()).await;

    let generation_rows: u64 = summaries.iter().map(|s| s.generation_rows).sum();
    let meter_rows: u64 = summaries.iter().map(|s| s.meter_rows).sum();
    let aborted = summaries
        .iter()
        .filter(|s| matches!(s.outcome, PlantOutcome::Aborted(_)))
        .count();
    let cancelled = summaries.iter().any(|s| s.outcome == PlantOutcome::Cancelled);

    tracing::info!(
        plants = summaries.len(),
        generation_rows,
        meter_rows,
        aborted,
        cancelled,
        dry_run = cfg.backfill.dry_run,
        "backfill run finished"
    );

    Ok(())
}
