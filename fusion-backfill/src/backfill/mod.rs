//! Resumable month-by-month history backfill.
//!
//! For every plant the cursor asks storage for the latest stored day,
//! resumes the day after it (or at the plant's start date), and walks
//! calendar months up to today or the configured cutoff. Months are fetched
//! one at a time through a single executor, so every pause holds back the
//! whole run. Nothing a month does can stop the next month from running,
//! except an authentication failure, which ends the current plant.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use solar_client::domain::Plant;
use time::{Date, Month};

use crate::{
    api::{FusionApi, Reply},
    clock::Sleeper,
    config::{secs, AppConfig},
    errors::{FusionError, FusionResult},
    normalize::normalize_daily,
    writer::{DailyStore, IdempotentWriter},
};

/// Range of the multiplicative jitter applied to the inter-month pause.
pub const PACING_JITTER: (f64, f64) = (0.8, 1.4);

/// Fetches the daily KPI payload for one plant-month.
#[async_trait::async_trait]
pub trait MonthFetcher: Send {
    async fn fetch_month(&mut self, station_code: &str, month_start: Date) -> FusionResult<Reply>;
}

#[async_trait::async_trait]
impl MonthFetcher for FusionApi {
    async fn fetch_month(&mut self, station_code: &str, month_start: Date) -> FusionResult<Reply> {
        self.kpi_station_day(station_code, month_start).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorSettings {
    pub per_month_delay: Duration,
    pub transport_pause: Duration,
    pub unexpected_pause: Duration,
    pub until: Option<Date>,
}

impl CursorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            per_month_delay: secs(cfg.backfill.per_month_delay_secs),
            transport_pause: secs(cfg.backfill.transport_pause_secs),
            unexpected_pause: secs(cfg.backfill.unexpected_pause_secs),
            until: cfg.until_date(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlantOutcome {
    Completed,
    /// Authentication failed; remaining months wait for the next run.
    Aborted(String),
    Cancelled,
}

/// What one plant's pass achieved. Row counts are confirmed writes
/// (or intended writes in a dry run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlantSummary {
    pub plant_code: String,
    pub resume_from: Option<Date>,
    pub months_planned: usize,
    pub months_written: usize,
    pub months_skipped: usize,
    pub months_failed: usize,
    pub generation_rows: u64,
    pub meter_rows: u64,
    pub meter_failures: usize,
    pub outcome: PlantOutcome,
}

impl PlantSummary {
    fn new(plant_code: &str) -> Self {
        Self {
            plant_code: plant_code.to_string(),
            resume_from: None,
            months_planned: 0,
            months_written: 0,
            months_skipped: 0,
            months_failed: 0,
            generation_rows: 0,
            meter_rows: 0,
            meter_failures: 0,
            outcome: PlantOutcome::Completed,
        }
    }
}

pub struct BackfillCursor<F, S> {
    fetcher: F,
    writer: IdempotentWriter<S>,
    sleeper: Arc<dyn Sleeper>,
    settings: CursorSettings,
}

impl<F: MonthFetcher, S: DailyStore> BackfillCursor<F, S> {
    pub fn new(fetcher: F, writer: IdempotentWriter<S>, sleeper: Arc<dyn Sleeper>, settings: CursorSettings) -> Self {
        Self {
            fetcher,
            writer,
            sleeper,
            settings,
        }
    }

    pub fn writer(&self) -> &IdempotentWriter<S> {
        &self.writer
    }

    /// Backfill `plants` in order, or only the plant matching `only`.
    ///
    /// Stops early only when the run is cancelled.
    pub async fn run(&mut self, plants: &[Plant], only: Option<&str>, today: Date) -> Vec<PlantSummary> {
        let selected: Vec<&Plant> = plants.iter().filter(|p| only.map_or(true, |o| p.code == o)).collect();

        if selected.is_empty() {
            tracing::warn!(only_plant = ?only, configured = plants.len(), "no plant selected for backfill");
            return Vec::new();
        }

        let end = effective_end(today, self.settings.until);
        tracing::info!(plants = selected.len(), %end, dry_run = self.writer.is_dry_run(), "backfill starting");

        let mut summaries = Vec::with_capacity(selected.len());
        for plant in selected {
            let summary = self.run_plant(plant, end).await;
            log_summary(&summary);
            let cancelled = summary.outcome == PlantOutcome::Cancelled;
            summaries.push(summary);
            if cancelled {
                break;
            }
        }

        summaries
    }

    async fn run_plant(&mut self, plant: &Plant, end: Date) -> PlantSummary {
        let mut summary = PlantSummary::new(&plant.code);

        let watermark = match self.writer.store().latest_generation_date(&plant.code).await {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(plant = %plant.code, error = %e, "watermark lookup failed, starting from plant start");
                None
            }
        };
        let resume = resume_date(watermark, plant.start_date);
        summary.resume_from = Some(resume);

        let months = month_starts(resume, end);
        summary.months_planned = months.len();
        tracing::info!(
            plant = %plant.code,
            watermark = ?watermark,
            %resume,
            months = months.len(),
            "plant backfill planned"
        );

        for month in months {
            let pause = match self.fetcher.fetch_month(&plant.code, month).await {
                Ok(Reply::Payload(env)) if env.is_success() => {
                    let normalized = normalize_daily(&plant.code, env.as_value());
                    let records = normalized.generation.len();
                    match self.writer.write_month(normalized).await {
                        Ok(written) => {
                            summary.months_written += 1;
                            summary.generation_rows += written.generation_rows;
                            summary.meter_rows += written.meter_rows;
                            if written.meter_failed {
                                summary.meter_failures += 1;
                            }
                            tracing::info!(
                                plant = %plant.code,
                                %month,
                                records,
                                generation_rows = written.generation_rows,
                                meter_rows = written.meter_rows,
                                "month written"
                            );
                            pacing_delay(self.settings.per_month_delay, rand::thread_rng().gen_range(PACING_JITTER.0..=PACING_JITTER.1))
                        }
                        Err(e) => {
                            summary.months_failed += 1;
                            tracing::error!(plant = %plant.code, %month, error = %e, "month write failed");
                            self.settings.unexpected_pause
                        }
                    }
                }
                Ok(reply) => {
                    summary.months_skipped += 1;
                    metrics::counter!("fusion_months_skipped_total").increment(1);
                    match reply {
                        Reply::Skipped(env) => {
                            tracing::warn!(plant = %plant.code, %month, response = %env.summary(), "rate limited, month skipped")
                        }
                        Reply::Payload(env) => {
                            tracing::warn!(plant = %plant.code, %month, response = %env.summary(), "request rejected, month skipped")
                        }
                        Reply::Empty => tracing::warn!(plant = %plant.code, %month, "non-JSON response, month skipped"),
                    }
                    pacing_delay(self.settings.per_month_delay, rand::thread_rng().gen_range(PACING_JITTER.0..=PACING_JITTER.1))
                }
                Err(FusionError::Auth(msg)) => {
                    tracing::error!(plant = %plant.code, %month, error = %msg, "authentication failed, aborting plant");
                    summary.outcome = PlantOutcome::Aborted(msg);
                    return summary;
                }
                Err(FusionError::Cancelled) => {
                    summary.outcome = PlantOutcome::Cancelled;
                    return summary;
                }
                Err(e) if e.is_transport() => {
                    summary.months_failed += 1;
                    tracing::warn!(plant = %plant.code, %month, error = %e, "transport failure, month skipped");
                    self.settings.transport_pause
                }
                Err(e) => {
                    summary.months_failed += 1;
                    tracing::error!(plant = %plant.code, %month, error = %e, "unexpected failure, month skipped");
                    self.settings.unexpected_pause
                }
            };

            if let Err(FusionError::Cancelled) = self.sleeper.sleep(pause).await {
                summary.outcome = PlantOutcome::Cancelled;
                return summary;
            }
        }

        summary
    }
}

fn log_summary(s: &PlantSummary) {
    tracing::info!(
        plant = %s.plant_code,
        outcome = ?s.outcome,
        months_planned = s.months_planned,
        months_written = s.months_written,
        months_skipped = s.months_skipped,
        months_failed = s.months_failed,
        generation_rows = s.generation_rows,
        meter_rows = s.meter_rows,
        meter_failures = s.meter_failures,
        "plant backfill finished"
    );
}

/// First day to fetch: the day after the watermark when it lies on or after
/// `start`, otherwise `start` itself.
pub fn resume_date(watermark: Option<Date>, start: Date) -> Date {
    match watermark {
        Some(w) if w >= start => w.next_day().unwrap_or(w),
        _ => start,
    }
}

/// Last day the run covers; a cutoff only narrows the range.
pub fn effective_end(today: Date, until: Option<Date>) -> Date {
    until.filter(|u| *u < today).unwrap_or(today)
}

/// First day of every month from `from`'s month through `through`'s month, ascending.
pub fn month_starts(from: Date, through: Date) -> Vec<Date> {
    let mut out = Vec::new();
    let Some(mut cursor) = month_start(from.year(), from.month()) else {
        return out;
    };

    while cursor <= through {
        out.push(cursor);
        let (year, month) = match cursor.month() {
            Month::December => (cursor.year() + 1, Month::January),
            m => (cursor.year(), m.next()),
        };
        match month_start(year, month) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    out
}

fn month_start(year: i32, month: Month) -> Option<Date> {
    Date::from_calendar_date(year, month, 1).ok()
}

/// Inter-month pause for a jitter sample; samples are clamped to [`PACING_JITTER`].
pub fn pacing_delay(base: Duration, sample: f64) -> Duration {
    base.mul_f64(sample.clamp(PACING_JITTER.0, PACING_JITTER.1))
}
