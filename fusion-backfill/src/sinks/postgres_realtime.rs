use std::{collections::BTreeMap, time::Duration};

use futures::StreamExt;
use solar_client::{db::realtime_queries, domain::RealtimeSample};
use sqlx::{Connection, PgConnection};

use crate::pipeline::{Envelope, PipelineError, Sink};

/// Writes realtime samples to `raw.fs_realtime_plants` and refreshes
/// `raw.fs_plants_last` with the newest sample of every plant in a batch.
pub struct PgRealtimeSink {
    database_url: String,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
    dry_run: bool,
}

impl PgRealtimeSink {
    pub fn new(
        database_url: impl Into<String>,
        batch_size: usize,
        max_retries: u32,
        retry_backoff: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
            dry_run,
        }
    }

    async fn flush_batch(&self, batch: &[Envelope<RealtimeSample>]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }

        if self.dry_run {
            for env in batch {
                let s = &env.payload;
                tracing::info!(
                    plant = %s.plant_code,
                    power_kw = s.power_kw,
                    day_kwh = s.day_power_kwh,
                    "dry run, realtime sample not stored"
                );
            }
            return Ok(());
        }

        let samples: Vec<RealtimeSample> = batch.iter().map(|e| e.payload.clone()).collect();

        let mut attempt: u32 = 0;
        loop {
            match self.write(&samples).await {
                Ok(inserted) => {
                    metrics::counter!("fusion_realtime_samples_written_total").increment(inserted);

                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        if let Ok(dur) = std::time::SystemTime::now().duration_since(min_received) {
                            metrics::histogram!("fusion_realtime_write_latency_seconds").record(dur.as_secs_f64());
                        }
                    }

                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "realtime flush failed, retrying with backoff");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "realtime flush failed, giving up");
                    metrics::counter!("fusion_realtime_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }

    async fn write(&self, samples: &[RealtimeSample]) -> anyhow::Result<u64> {
        let mut conn = PgConnection::connect(&self.database_url).await?;

        let inserted = realtime_queries::insert_realtime_samples(&mut conn, samples).await?;
        for sample in latest_per_plant(samples) {
            realtime_queries::upsert_last_state(&mut conn, sample).await?;
        }

        conn.close().await?;
        Ok(inserted)
    }
}

/// Newest sample of every plant, in plant-code order.
fn latest_per_plant(samples: &[RealtimeSample]) -> Vec<&RealtimeSample> {
    let mut latest: BTreeMap<&str, &RealtimeSample> = BTreeMap::new();
    for s in samples {
        match latest.get(s.plant_code.as_str()) {
            Some(prev) if prev.ts_utc > s.ts_utc => {}
            _ => {
                latest.insert(&s.plant_code, s);
            }
        }
    }
    latest.into_values().collect()
}

#[async_trait::async_trait]
impl Sink<RealtimeSample> for PgRealtimeSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<RealtimeSample>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<Envelope<RealtimeSample>> = Vec::with_capacity(self.batch_size);

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "upstream error in realtime pipeline");
                    continue;
                }
            };

            buffer.push(env);
            if buffer.len() >= self.batch_size {
                self.flush_batch(&buffer).await?;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            self.flush_batch(&buffer).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample(code: &str, ts: time::OffsetDateTime, power: f64) -> RealtimeSample {
        RealtimeSample {
            plant_code: code.to_string(),
            ts_utc: ts,
            plant_name: code.to_string(),
            power_kw: power,
            day_power_kwh: 0.0,
            month_power_kwh: 0.0,
            total_power_kwh: 0.0,
            health: 3,
        }
    }

    #[test]
    fn latest_sample_wins_per_plant() {
        let samples = vec![
            sample("NE=2", datetime!(2025-01-01 10:00 UTC), 1.0),
            sample("NE=1", datetime!(2025-01-01 10:05 UTC), 2.0),
            sample("NE=2", datetime!(2025-01-01 10:03 UTC), 3.0),
            sample("NE=1", datetime!(2025-01-01 10:01 UTC), 4.0),
        ];

        let latest = latest_per_plant(&samples);

        assert_eq!(latest.len(), 2);
        assert_eq!((latest[0].plant_code.as_str(), latest[0].power_kw), ("NE=1", 2.0));
        assert_eq!((latest[1].plant_code.as_str(), latest[1].power_kw), ("NE=2", 3.0));
    }

    #[tokio::test]
    async fn dry_run_drains_stream_without_database() {
        let sink = PgRealtimeSink::new("postgres://unused", 2, 0, Duration::from_millis(1), true);
        let items: Vec<Result<Envelope<RealtimeSample>, PipelineError>> = vec![
            Ok(Envelope {
                payload: sample("NE=1", datetime!(2025-01-01 10:00 UTC), 1.0),
                received_at: std::time::SystemTime::now(),
            }),
            Err(PipelineError::Transform("negative power".to_string())),
            Ok(Envelope {
                payload: sample("NE=2", datetime!(2025-01-01 10:00 UTC), 2.0),
                received_at: std::time::SystemTime::now(),
            }),
        ];

        let res = sink.run(futures::stream::iter(items)).await;
        assert!(res.is_ok());
    }
}
