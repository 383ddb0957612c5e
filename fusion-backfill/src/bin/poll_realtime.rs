use std::sync::Arc;

use anyhow::Result;
use fusion_backfill::{
    api::FusionApi,
    clock::{cancel_on_ctrl_c, TokioSleeper},
    config::AppConfig,
    metrics_server, observability,
    pipeline::Pipeline,
    sinks::PgRealtimeSink,
    sources::{PollSchedule, RealtimeKpiSource},
    transform::RealtimeSampleValidation,
};
use solar_client::domain::RealtimeSample;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let stations = cfg.realtime_stations()?;
    if stations.is_empty() {
        anyhow::bail!("no stations to poll: configure [[plants]] or STATION_CODES");
    }

    let sleeper = Arc::new(TokioSleeper::new(cancel_on_ctrl_c()));
    let api = FusionApi::from_config(&cfg, sleeper.clone());

    let rt = &cfg.realtime;
    tracing::info!(
        stations = stations.len(),
        per_plant_delay_secs = rt.per_plant_delay_secs,
        max_cycles = ?rt.max_cycles,
        dry_run = cfg.backfill.dry_run,
        "realtime polling starting"
    );

    let pipeline: Pipeline<_, RealtimeSample, _> = Pipeline {
        name: "realtime_kpi",
        source: RealtimeKpiSource::new(api, stations, sleeper, PollSchedule::from_config(&cfg)),
        transforms: vec![Arc::new(RealtimeSampleValidation)],
        sink: PgRealtimeSink::new(
            cfg.database.url.clone(),
            rt.batch_size,
            rt.max_retries,
            Duration::from_millis(rt.retry_backoff_ms),
            cfg.backfill.dry_run,
        ),
    };

    pipeline.run().await?;

    Ok(())
}
