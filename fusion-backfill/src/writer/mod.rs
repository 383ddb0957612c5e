use std::collections::BTreeMap;

use solar_client::domain::{GenerationDay, MeterDay};
use time::Date;

use crate::{errors::FusionResult, normalize::NormalizedMonth};

/// Daily history storage keyed by (plant, date).
#[async_trait::async_trait]
pub trait DailyStore: Send + Sync {
    /// Latest stored generation date for a plant.
    async fn latest_generation_date(&self, plant_code: &str) -> FusionResult<Option<Date>>;

    async fn upsert_generation(&self, rows: &[GenerationDay]) -> FusionResult<u64>;

    async fn upsert_meter(&self, rows: &[MeterDay]) -> FusionResult<u64>;
}

/// Outcome of writing one fetched month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub generation_rows: u64,
    pub meter_rows: u64,
    pub meter_failed: bool,
}

/// Writes normalized months as two independent upserts.
///
/// The generation write is authoritative: its failure is returned to the
/// caller. The meter write is secondary: its failure is logged and counted
/// but never undoes or blocks the generation rows.
pub struct IdempotentWriter<S> {
    store: S,
    dry_run: bool,
}

impl<S: DailyStore> IdempotentWriter<S> {
    pub fn new(store: S, dry_run: bool) -> Self {
        Self { store, dry_run }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub async fn write_month(&self, month: NormalizedMonth) -> FusionResult<WriteSummary> {
        let generation = dedupe(month.generation, |r| (r.plant_code.clone(), r.ddate));
        let meter = dedupe(month.meter, |r| (r.plant_code.clone(), r.ts_date));

        if generation.is_empty() && meter.is_empty() {
            return Ok(WriteSummary::default());
        }

        if self.dry_run {
            tracing::info!(
                generation_rows = generation.len(),
                meter_rows = meter.len(),
                "dry run, skipping writes"
            );
            return Ok(WriteSummary {
                generation_rows: generation.len() as u64,
                meter_rows: meter.len() as u64,
                meter_failed: false,
            });
        }

        let generation_rows = self.store.upsert_generation(&generation).await?;
        metrics::counter!("fusion_generation_rows_written_total").increment(generation_rows);

        let (meter_rows, meter_failed) = match self.store.upsert_meter(&meter).await {
            Ok(n) => {
                metrics::counter!("fusion_meter_rows_written_total").increment(n);
                (n, false)
            }
            Err(e) => {
                tracing::warn!(error = %e, rows = meter.len(), "meter write failed, generation rows kept");
                metrics::counter!("fusion_meter_write_failures_total").increment(1);
                (0, true)
            }
        };

        Ok(WriteSummary {
            generation_rows,
            meter_rows,
            meter_failed,
        })
    }
}

// A single upsert statement cannot touch the same key twice, so the last
// record for a key wins before the batch is sent.
fn dedupe<T, K: Ord>(rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut by_key = BTreeMap::new();
    for row in rows {
        by_key.insert(key(&row), row);
    }
    by_key.into_values().collect()
}
