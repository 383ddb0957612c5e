use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RealtimeSample {
    pub plant_code: String,
    pub ts_utc: OffsetDateTime,
    pub plant_name: String,
    pub power_kw: f64,
    pub day_power_kwh: f64,
    pub month_power_kwh: f64,
    pub total_power_kwh: f64,
    pub health: i32,
}
