use std::sync::Arc;

use serde_json::json;
use time::{Date, Duration};

use super::{
    backoff::{BackoffPolicy, NetworkRetry},
    executor::{Reply, RequestExecutor},
    session::{SessionManager, SessionSettings},
    KPI_STATION_DAY_PATH, STATION_REAL_KPI_PATH,
};
use crate::{clock::Sleeper, config::AppConfig, errors::FusionResult};

/// Typed FusionSolar calls over a [`RequestExecutor`].
pub struct FusionApi {
    executor: RequestExecutor,
}

impl FusionApi {
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }

    pub fn from_config(cfg: &AppConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        let session = SessionManager::new(SessionSettings::from_config(cfg));
        let executor = RequestExecutor::new(
            session,
            BackoffPolicy::from_config(&cfg.backfill),
            NetworkRetry::from_config(&cfg.fusion),
            sleeper,
        );
        Self::new(executor)
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Daily KPIs for every day of the month containing `month`.
    pub async fn kpi_station_day(&mut self, station_code: &str, month: Date) -> FusionResult<Reply> {
        let body = json!({
            "stationCodes": station_code,
            "collectTime": collect_time_ms(month),
        });
        self.executor.execute(KPI_STATION_DAY_PATH, &body).await
    }

    /// Current power and cumulative energy counters of one station.
    pub async fn station_real_kpi(&mut self, station_code: &str) -> FusionResult<Reply> {
        let body = json!({ "stationCodes": station_code });
        self.executor.execute(STATION_REAL_KPI_PATH, &body).await
    }
}

pub fn first_of_month(day: Date) -> Date {
    day - Duration::days(i64::from(day.day()) - 1)
}

/// Epoch milliseconds of midnight UTC on the first day of `month`'s month.
pub fn collect_time_ms(month: Date) -> i64 {
    first_of_month(month).midnight().assume_utc().unix_timestamp() * 1000
}
