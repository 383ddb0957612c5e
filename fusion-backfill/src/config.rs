use serde::Deserialize;
use solar_client::domain::Plant;
use std::{fs, io::ErrorKind, time::Duration};
use time::{macros::format_description, Date};

use crate::errors::{FusionError, FusionResult};

#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    /// Vendor host (e.g. `la5.fusionsolar.huawei.com`) or a full base URL.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub system_code: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: f64,
    #[serde(default = "default_net_retry_total")]
    pub net_retry_total: u32,
    #[serde(default = "default_net_retry_backoff_secs")]
    pub net_retry_backoff_secs: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    /// Inclusive cutoff (`YYYY-MM-DD`); only honoured when earlier than today.
    #[serde(default)]
    pub until_date: Option<String>,
    #[serde(default)]
    pub only_plant: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_per_month_delay_secs")]
    pub per_month_delay_secs: f64,
    #[serde(default = "default_backoff_secs_407")]
    pub backoff_secs_407: f64,
    #[serde(default = "default_backoff_growth")]
    pub backoff_growth: f64,
    #[serde(default = "default_backoff_floor_secs")]
    pub backoff_floor_secs: f64,
    #[serde(default = "default_max_retries_407")]
    pub max_retries_407_per_month: u32,
    #[serde(default = "default_transport_pause_secs")]
    pub transport_pause_secs: f64,
    #[serde(default = "default_unexpected_pause_secs")]
    pub unexpected_pause_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Stations to poll; defaults to every configured plant.
    #[serde(default)]
    pub station_codes: Vec<String>,
    #[serde(default = "default_per_plant_delay_secs")]
    pub per_plant_delay_secs: f64,
    #[serde(default = "default_startup_cooldown_secs")]
    pub startup_cooldown_secs: f64,
    #[serde(default)]
    pub max_cycles: Option<u64>,
    #[serde(default = "default_realtime_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sink_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_sink_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantConfig {
    pub code: String,
    /// `YYYY-MM-DD`
    pub start_date: String,
    #[serde(default)]
    pub capacity_kwp: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub plants: Vec<PlantConfig>,
    pub metrics: Option<MetricsConfig>,
}

fn default_http_timeout_secs() -> f64 {
    60.0
}

fn default_net_retry_total() -> u32 {
    5
}

fn default_net_retry_backoff_secs() -> f64 {
    0.5
}

fn default_per_month_delay_secs() -> f64 {
    2.5
}

fn default_backoff_secs_407() -> f64 {
    480.0
}

fn default_backoff_growth() -> f64 {
    1.2
}

fn default_backoff_floor_secs() -> f64 {
    60.0
}

fn default_max_retries_407() -> u32 {
    4
}

fn default_transport_pause_secs() -> f64 {
    10.0
}

fn default_unexpected_pause_secs() -> f64 {
    4.0
}

fn default_per_plant_delay_secs() -> f64 {
    180.0
}

fn default_startup_cooldown_secs() -> f64 {
    60.0
}

fn default_realtime_batch_size() -> usize {
    1
}

fn default_sink_max_retries() -> u32 {
    3
}

fn default_sink_retry_backoff_ms() -> u64 {
    500
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            user: String::new(),
            system_code: String::new(),
            http_timeout_secs: default_http_timeout_secs(),
            net_retry_total: default_net_retry_total(),
            net_retry_backoff_secs: default_net_retry_backoff_secs(),
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            until_date: None,
            only_plant: None,
            dry_run: false,
            per_month_delay_secs: default_per_month_delay_secs(),
            backoff_secs_407: default_backoff_secs_407(),
            backoff_growth: default_backoff_growth(),
            backoff_floor_secs: default_backoff_floor_secs(),
            max_retries_407_per_month: default_max_retries_407(),
            transport_pause_secs: default_transport_pause_secs(),
            unexpected_pause_secs: default_unexpected_pause_secs(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            station_codes: Vec::new(),
            per_plant_delay_secs: default_per_plant_delay_secs(),
            startup_cooldown_secs: default_startup_cooldown_secs(),
            max_cycles: None,
            batch_size: default_realtime_batch_size(),
            max_retries: default_sink_max_retries(),
            retry_backoff_ms: default_sink_retry_backoff_ms(),
        }
    }
}

impl AppConfig {
    /// Read the TOML file named by `FUSION_CONFIG`, apply environment overrides and validate.
    ///
    /// A missing file is fine as long as the environment supplies the required keys.
    pub fn load() -> FusionResult<Self> {
        use std::env;

        let path = env::var("FUSION_CONFIG").unwrap_or_else(|_| "fusion-backfill.toml".to_string());
        let mut cfg = match fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path, "config file not found, using environment only");
                Self::default()
            }
            Err(e) => return Err(FusionError::Config(format!("failed to read {path}: {e}"))),
        };

        cfg.apply_env(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> FusionResult<Self> {
        toml::from_str(contents).map_err(|e| FusionError::Config(format!("invalid config file: {e}")))
    }

    /// Overlay environment-style settings on top of the file values.
    pub fn apply_env<F>(&mut self, lookup: F) -> FusionResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("FUSION_DOMAIN") {
            self.fusion.domain = v;
        }
        if let Some(v) = var("FS_USER") {
            self.fusion.user = v;
        }
        if let Some(v) = var("FS_SYSCODE") {
            self.fusion.system_code = v;
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("ONLY_PLANT") {
            self.backfill.only_plant = Some(v);
        }
        if let Some(v) = var("UNTIL_DATE") {
            self.backfill.until_date = Some(v);
        }
        if let Some(v) = var("DRY_RUN") {
            self.backfill.dry_run = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y");
        }
        if let Some(v) = var("HTTP_TIMEOUT_SECONDS") {
            self.fusion.http_timeout_secs = parse_number("HTTP_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = var("PER_MONTH_DELAY_SECONDS") {
            self.backfill.per_month_delay_secs = parse_number("PER_MONTH_DELAY_SECONDS", &v)?;
        }
        if let Some(v) = var("BACKOFF_SECONDS_407") {
            self.backfill.backoff_secs_407 = parse_number("BACKOFF_SECONDS_407", &v)?;
        }
        if let Some(v) = var("MAX_RETRIES_407_PER_MONTH") {
            self.backfill.max_retries_407_per_month = parse_number("MAX_RETRIES_407_PER_MONTH", &v)?;
        }
        if let Some(v) = var("STATION_CODES") {
            self.realtime.station_codes = v.split(',').map(str::to_string).collect();
        }

        Ok(())
    }

    /// Fail fast on missing credentials or unusable plant entries.
    pub fn validate(&self) -> FusionResult<()> {
        let required = [
            ("FUSION_DOMAIN", &self.fusion.domain),
            ("FS_USER", &self.fusion.user),
            ("FS_SYSCODE", &self.fusion.system_code),
            ("DATABASE_URL", &self.database.url),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(key, _)| *key)
            .collect();

        if !missing.is_empty() {
            return Err(FusionError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        if !(self.fusion.http_timeout_secs > 0.0) {
            return Err(FusionError::Config("http_timeout_secs must be positive".to_string()));
        }

        self.plants().map(|_| ())
    }

    /// Configured plants in file order with normalized station codes.
    pub fn plants(&self) -> FusionResult<Vec<Plant>> {
        self.plants
            .iter()
            .map(|p| {
                let code = normalize_station_code(&p.code)
                    .ok_or_else(|| FusionError::Config(format!("invalid station code '{}'", p.code)))?;
                let start_date = parse_date(&p.start_date).ok_or_else(|| {
                    FusionError::Config(format!("invalid start_date '{}' for {code}", p.start_date))
                })?;
                Ok(Plant {
                    code,
                    start_date,
                    capacity_kwp: p.capacity_kwp,
                })
            })
            .collect()
    }

    /// Cutoff date, if one is configured and parses. Unparseable values are logged and ignored.
    pub fn until_date(&self) -> Option<Date> {
        let raw = self.backfill.until_date.as_deref()?;
        match parse_date(raw) {
            Some(d) => Some(d),
            None => {
                tracing::warn!(until_date = raw, "invalid UNTIL_DATE, ignoring");
                None
            }
        }
    }

    pub fn only_plant(&self) -> Option<String> {
        self.backfill.only_plant.as_deref().and_then(normalize_station_code)
    }

    /// Stations for realtime polling: the explicit list when present, otherwise every plant.
    pub fn realtime_stations(&self) -> FusionResult<Vec<String>> {
        if self.realtime.station_codes.is_empty() {
            return Ok(self.plants()?.into_iter().map(|p| p.code).collect());
        }
        Ok(self
            .realtime
            .station_codes
            .iter()
            .filter_map(|c| normalize_station_code(c))
            .collect())
    }

    pub fn http_timeout(&self) -> Duration {
        secs(self.fusion.http_timeout_secs)
    }
}

/// Seconds from config as a `Duration`; negative or non-finite values become zero.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or_default()
}

/// `33723010`, `NE=33723010` and `STATION_CODES=NE=33723010` all become `NE=33723010`.
pub fn normalize_station_code(raw: &str) -> Option<String> {
    let mut code = raw.trim();
    if let Some(rest) = code.strip_prefix("STATION_CODES=") {
        code = rest.trim();
    }
    if code.is_empty() {
        return None;
    }
    if !code.starts_with("NE=") && code.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("NE={code}"));
    }
    Some(code.to_string())
}

pub fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> FusionResult<T> {
    value
        .parse()
        .map_err(|_| FusionError::Config(format!("{key} must be a number, got '{value}'")))
}
