//! FusionSolar "thirdData" API access: session lifecycle, response
//! classification with relogin/backoff, and the typed calls built on top.

pub mod backoff;
pub mod client;
pub mod envelope;
pub mod executor;
pub mod session;

pub use backoff::{BackoffPolicy, NetworkRetry};
pub use client::{collect_time_ms, FusionApi};
pub use envelope::ApiEnvelope;
pub use executor::{Reply, RequestExecutor};
pub use session::{SessionManager, SessionSettings};

pub const HANDSHAKE_PATH: &str = "/thirdData/";
pub const LOGIN_PATH: &str = "/thirdData/login";
pub const KPI_STATION_DAY_PATH: &str = "/thirdData/getKpiStationDay";
pub const STATION_REAL_KPI_PATH: &str = "/thirdData/getStationRealKpi";
