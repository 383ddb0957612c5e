use serde_json::Value;
use time::Date;

/// One day of plant production, keyed by `(plant_code, ddate)`.
///
/// `payload_json` keeps the vendor record the value was derived from.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenerationDay {
    pub plant_code: String,
    pub ddate: Date,
    pub day_kwh: f64,
    pub payload_json: Value,
}

/// One day of metered consumption and grid export, keyed by `(plant_code, ts_date)`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeterDay {
    pub ts_date: Date,
    pub plant_code: String,
    pub day_use_kwh: f64,
    pub day_grid_kwh: f64,
}
