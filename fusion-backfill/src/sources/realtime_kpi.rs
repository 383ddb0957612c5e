use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use solar_client::domain::RealtimeSample;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::{
    api::{FusionApi, Reply},
    clock::Sleeper,
    config::{secs, AppConfig},
    errors::FusionError,
    normalize::normalize_realtime,
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
};

#[derive(Debug, Clone, PartialEq)]
pub struct PollSchedule {
    /// Minimum gap between two consecutive station calls.
    pub per_plant_delay: Duration,
    /// One-off wait before the first call.
    pub startup_cooldown: Duration,
    /// Stop after this many passes over the station list; `None` polls forever.
    pub max_cycles: Option<u64>,
}

impl PollSchedule {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            per_plant_delay: secs(cfg.realtime.per_plant_delay_secs),
            startup_cooldown: secs(cfg.realtime.startup_cooldown_secs),
            max_cycles: cfg.realtime.max_cycles,
        }
    }
}

/// Polls `getStationRealKpi` for each station in turn, one station per
/// spacing interval, and yields one sample per station that returned data.
///
/// The stream ends after `max_cycles` passes or when a wait is cancelled.
/// Failures for a single station are yielded as errors and polling moves on.
pub struct RealtimeKpiSource {
    api: Arc<Mutex<FusionApi>>,
    stations: Vec<String>,
    sleeper: Arc<dyn Sleeper>,
    schedule: PollSchedule,
}

impl RealtimeKpiSource {
    pub fn new(api: FusionApi, stations: Vec<String>, sleeper: Arc<dyn Sleeper>, schedule: PollSchedule) -> Self {
        Self {
            api: Arc::new(Mutex::new(api)),
            stations,
            sleeper,
            schedule,
        }
    }
}

#[async_trait::async_trait]
impl Source<RealtimeSample> for RealtimeKpiSource {
    async fn stream(&self) -> EnvelopeStream<RealtimeSample> {
        let api = self.api.clone();
        let stations = self.stations.clone();
        let sleeper = self.sleeper.clone();
        let schedule = self.schedule.clone();

        let s = async_stream::stream! {
            if stations.is_empty() {
                tracing::warn!("no stations configured for realtime polling");
                return;
            }

            if sleeper.sleep(schedule.startup_cooldown).await.is_err() {
                return;
            }

            let mut last_call: Option<Instant> = None;
            let mut cycle: u64 = 0;

            loop {
                if schedule.max_cycles.is_some_and(|max| cycle >= max) {
                    break;
                }
                cycle += 1;
                let (mut sampled, mut skipped, mut failed) = (0usize, 0usize, 0usize);

                for station in &stations {
                    if let Some(last) = last_call {
                        let wait = schedule.per_plant_delay.saturating_sub(last.elapsed());
                        if !wait.is_zero() && sleeper.sleep(wait).await.is_err() {
                            return;
                        }
                    }

                    let reply = api.lock().await.station_real_kpi(station).await;
                    last_call = Some(Instant::now());

                    match reply {
                        Ok(Reply::Payload(env)) if env.is_success() => {
                            match normalize_realtime(station, env.as_value(), OffsetDateTime::now_utc()) {
                                Some(sample) => {
                                    sampled += 1;
                                    metrics::counter!("fusion_realtime_samples_total").increment(1);
                                    tracing::debug!(plant = %station, power_kw = sample.power_kw, "realtime sample");
                                    yield Ok(Envelope::now(sample));
                                }
                                None => {
                                    skipped += 1;
                                    tracing::warn!(plant = %station, "realtime response without data");
                                }
                            }
                        }
                        Ok(Reply::Payload(env)) | Ok(Reply::Skipped(env)) => {
                            skipped += 1;
                            tracing::warn!(plant = %station, response = %env.summary(), "realtime request not served");
                        }
                        Ok(Reply::Empty) => {
                            skipped += 1;
                            tracing::warn!(plant = %station, "realtime response was not JSON");
                        }
                        Err(FusionError::Cancelled) => return,
                        Err(e) => {
                            failed += 1;
                            tracing::warn!(plant = %station, error = %e, "realtime request failed");
                            yield Err(PipelineError::Source(format!("{station}: {e}")));
                        }
                    }
                }

                tracing::info!(cycle, sampled, skipped, failed, "realtime cycle finished");
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;
    use crate::clock::testing::RecordingSleeper;

    fn config(domain: String) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.fusion.domain = domain;
        cfg.fusion.user = "u".to_string();
        cfg.fusion.system_code = "s".to_string();
        cfg
    }

    #[tokio::test]
    async fn one_cycle_yields_samples_and_spaces_calls() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/thirdData/login")
            .with_status(200)
            .with_header("XSRF-TOKEN", "tok")
            .create_async()
            .await;
        let _with_data = server
            .mock("POST", "/thirdData/getStationRealKpi")
            .match_body(Matcher::PartialJson(json!({"stationCodes": "NE=1"})))
            .with_status(200)
            .with_body(r#"{"success":true,"data":[{"stationCode":"NE=1","dataItemMap":{"day_power":"12.5","total_power":900,"real_health_state":3}}]}"#)
            .create_async()
            .await;
        let _empty = server
            .mock("POST", "/thirdData/getStationRealKpi")
            .match_body(Matcher::PartialJson(json!({"stationCodes": "NE=2"})))
            .with_status(200)
            .with_body(r#"{"success":true,"data":[]}"#)
            .create_async()
            .await;
        let _limited = server
            .mock("POST", "/thirdData/getStationRealKpi")
            .match_body(Matcher::PartialJson(json!({"stationCodes": "NE=3"})))
            .with_status(200)
            .with_body(r#"{"success":false,"failCode":20010,"message":"station not found"}"#)
            .create_async()
            .await;

        let cfg = config(server.url());
        let sleeper = Arc::new(RecordingSleeper::default());
        let api = FusionApi::from_config(&cfg, sleeper.clone());
        let schedule = PollSchedule {
            per_plant_delay: Duration::from_secs(180),
            startup_cooldown: Duration::from_secs(60),
            max_cycles: Some(1),
        };
        let stations = vec!["NE=1".to_string(), "NE=2".to_string(), "NE=3".to_string()];
        let source = RealtimeKpiSource::new(api, stations, sleeper.clone(), schedule);

        let items: Vec<_> = source.stream().await.collect().await;

        assert_eq!(items.len(), 1);
        let sample = &items[0].as_ref().unwrap().payload;
        assert_eq!(sample.plant_code, "NE=1");
        assert_eq!(sample.day_power_kwh, 12.5);
        assert_eq!(sample.total_power_kwh, 900.0);
        assert_eq!(sample.health, 3);

        let waits = sleeper.waits();
        assert_eq!(waits.len(), 3);
        assert_eq!(waits[0], Duration::from_secs(60));
        assert!(waits[1..].iter().all(|w| *w > Duration::from_secs(170) && *w <= Duration::from_secs(180)));
    }

    #[tokio::test]
    async fn failed_station_is_yielded_as_error_and_polling_continues() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/thirdData/login")
            .with_status(200)
            .with_header("XSRF-TOKEN", "tok")
            .create_async()
            .await;
        let _broken = server
            .mock("POST", "/thirdData/getStationRealKpi")
            .match_body(Matcher::PartialJson(json!({"stationCodes": "NE=1"})))
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;
        let _ok = server
            .mock("POST", "/thirdData/getStationRealKpi")
            .match_body(Matcher::PartialJson(json!({"stationCodes": "NE=2"})))
            .with_status(200)
            .with_body(r#"{"success":true,"data":[{"realTimePower":4.2}]}"#)
            .create_async()
            .await;

        let cfg = config(server.url());
        let sleeper = Arc::new(RecordingSleeper::default());
        let api = FusionApi::from_config(&cfg, sleeper.clone());
        let schedule = PollSchedule {
            per_plant_delay: Duration::ZERO,
            startup_cooldown: Duration::ZERO,
            max_cycles: Some(2),
        };
        let source = RealtimeKpiSource::new(api, vec!["NE=1".to_string(), "NE=2".to_string()], sleeper, schedule);

        let items: Vec<_> = source.stream().await.collect().await;

        assert_eq!(items.len(), 4);
        assert!(matches!(&items[0], Err(PipelineError::Source(msg)) if msg.starts_with("NE=1")));
        let sample = &items[1].as_ref().unwrap().payload;
        assert_eq!(sample.plant_code, "NE=2");
        assert_eq!(sample.plant_name, "NE=2");
        assert_eq!(sample.power_kw, 4.2);
    }
}
