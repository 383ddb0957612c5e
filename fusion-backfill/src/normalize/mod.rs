//! Turns vendor payloads into canonical rows.
//!
//! Field names differ between FusionSolar regions and firmware versions.
//! Every metric is therefore resolved through an ordered alias table; a
//! new regional variant is a new table entry, not new code.

use serde_json::{json, Value};
use solar_client::domain::{GenerationDay, MeterDay, RealtimeSample};
use time::{Date, OffsetDateTime};

/// Envelope fields that may hold the record list, tried in order.
pub const RECORD_LIST_FIELDS: [&str; 2] = ["data", "datas"];
/// Field holding the record list when the envelope wraps it in an object.
pub const NESTED_RECORDS_FIELD: &str = "records";
/// Per-record map of metric values.
pub const METRICS_MAP_FIELD: &str = "dataItemMap";
/// Per-record timestamp, epoch milliseconds UTC.
pub const COLLECT_TIME_FIELD: &str = "collectTime";

/// Daily metrics extracted from `getKpiStationDay` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyMetric {
    Generation,
    GridExport,
    Consumption,
}

impl DailyMetric {
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Generation => &["inverter_power", "product_power", "day_power", "daily_power_generation"],
            Self::GridExport => &["ongrid_power", "daily_on_grid_energy", "on_grid_power"],
            Self::Consumption => &["use_power", "daily_use_energy"],
        }
    }
}

/// Realtime KPIs extracted from `getStationRealKpi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeMetric {
    StationName,
    Power,
    DayEnergy,
    MonthEnergy,
    TotalEnergy,
    Health,
}

impl RealtimeMetric {
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::StationName => &["stationName", "name", "plantName", "stationCode"],
            Self::Power => &["realTimePower", "realtimePower", "activePower", "power"],
            Self::DayEnergy => &["day_power", "day_on_grid_energy"],
            Self::MonthEnergy => &["month_power"],
            Self::TotalEnergy => &["total_power"],
            Self::Health => &["real_health_state"],
        }
    }
}

/// Rows derived from one month of daily records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedMonth {
    pub generation: Vec<GenerationDay>,
    pub meter: Vec<MeterDay>,
    /// Records dropped for lacking a usable timestamp.
    pub skipped: usize,
}

impl NormalizedMonth {
    pub fn is_empty(&self) -> bool {
        self.generation.is_empty() && self.meter.is_empty()
    }
}

/// The record list of a response body; absent or oddly shaped lists yield no records.
pub fn record_list(body: &Value) -> &[Value] {
    for field in RECORD_LIST_FIELDS {
        if let Some(Value::Array(items)) = body.get(field) {
            if !items.is_empty() {
                return items;
            }
        }
    }
    for field in RECORD_LIST_FIELDS {
        if let Some(Value::Array(items)) = body.get(field).and_then(|v| v.get(NESTED_RECORDS_FIELD)) {
            if !items.is_empty() {
                return items;
            }
        }
    }
    &[]
}

/// Normalize a `getKpiStationDay` body into generation and meter rows in one pass.
pub fn normalize_daily(plant_code: &str, body: &Value) -> NormalizedMonth {
    let mut out = NormalizedMonth::default();

    for record in record_list(body) {
        let Some(day) = record.get(COLLECT_TIME_FIELD).and_then(epoch_millis).and_then(utc_date) else {
            out.skipped += 1;
            continue;
        };

        let generation = resolve_metric(record, DailyMetric::Generation.aliases());
        let export = resolve_metric(record, DailyMetric::GridExport.aliases());
        let consumption = resolve_metric(record, DailyMetric::Consumption.aliases());

        let metrics_map = record
            .get(METRICS_MAP_FIELD)
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));
        let snapshot = json!({
            "plant_code": plant_code,
            "collectTime": record.get(COLLECT_TIME_FIELD),
            "dataItemMap": metrics_map,
        });

        out.generation.push(GenerationDay {
            plant_code: plant_code.to_string(),
            ddate: day,
            day_kwh: generation,
            payload_json: snapshot,
        });
        out.meter.push(MeterDay {
            ts_date: day,
            plant_code: plant_code.to_string(),
            day_use_kwh: consumption,
            day_grid_kwh: export,
        });
    }

    if out.skipped > 0 {
        tracing::debug!(plant = plant_code, skipped = out.skipped, "records without collectTime dropped");
    }

    out
}

/// Normalize the first station record of a `getStationRealKpi` body.
///
/// Returns `None` when the body carries no record at all.
pub fn normalize_realtime(plant_code: &str, body: &Value, ts_utc: OffsetDateTime) -> Option<RealtimeSample> {
    let data = body.get("data")?;
    let first = match data {
        Value::Array(items) => items.first()?,
        Value::Object(map) if !map.is_empty() => data,
        _ => return None,
    };

    let plant_name = resolve_text(first, RealtimeMetric::StationName.aliases()).unwrap_or_else(|| plant_code.to_string());
    let health = RealtimeMetric::Health
        .aliases()
        .iter()
        .find_map(|alias| lookup(first, alias).and_then(numeric))
        .map(|h| h as i32)
        .unwrap_or(0);

    Some(RealtimeSample {
        plant_code: plant_code.to_string(),
        ts_utc,
        plant_name,
        power_kw: resolve_metric(first, RealtimeMetric::Power.aliases()),
        day_power_kwh: resolve_metric(first, RealtimeMetric::DayEnergy.aliases()),
        month_power_kwh: resolve_metric(first, RealtimeMetric::MonthEnergy.aliases()),
        total_power_kwh: resolve_metric(first, RealtimeMetric::TotalEnergy.aliases()),
        health,
    })
}

/// First alias with a usable numeric value, flat fields before the metrics map; zero otherwise.
pub fn resolve_metric(record: &Value, aliases: &[&str]) -> f64 {
    aliases
        .iter()
        .find_map(|alias| lookup(record, alias).and_then(numeric))
        .unwrap_or(0.0)
}

fn resolve_text(record: &Value, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| match lookup(record, alias)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lookup<'a>(record: &'a Value, key: &str) -> Option<&'a Value> {
    record
        .get(key)
        .filter(|v| !v.is_null())
        .or_else(|| {
            record
                .get(METRICS_MAP_FIELD)
                .and_then(|m| m.get(key))
                .filter(|v| !v.is_null())
        })
}

/// Numbers as-is; strings parsed, falling back to their digits (`"12.5 kWh"` is 12.5).
fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok().or_else(|| {
            let digits: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            digits.parse().ok()
        }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn epoch_millis(value: &Value) -> Option<i64> {
    let ms = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (ms > 0).then_some(ms)
}

fn utc_date(ms: i64) -> Option<Date> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .map(|t| t.date())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    // 2023-06-01T00:00:00Z
    const JUNE_1_MS: i64 = 1_685_577_600_000;
    const DAY_MS: i64 = 86_400_000;

    fn record(day_index: i64, gen: f64) -> Value {
        json!({
            "collectTime": JUNE_1_MS + day_index * DAY_MS,
            "dataItemMap": {
                "inverter_power": gen,
                "ongrid_power": gen / 2.0,
                "use_power": 3.0
            }
        })
    }

    #[test]
    fn thirty_records_with_one_malformed_yield_twenty_nine_rows() {
        let mut records: Vec<Value> = (0..29).map(|i| record(i, 100.0 + i as f64)).collect();
        records.insert(10, json!({"dataItemMap": {"inverter_power": 5.0}}));
        assert_eq!(records.len(), 30);

        let out = normalize_daily("NE=1", &json!({"success": true, "data": records}));

        assert_eq!(out.generation.len(), 29);
        assert_eq!(out.meter.len(), 29);
        assert_eq!(out.skipped, 1);
        assert_eq!(out.generation[0].ddate, date!(2023 - 06 - 01));
        assert_eq!(out.generation[28].ddate, date!(2023 - 06 - 29));
    }

    #[test]
    fn metrics_only_in_nested_map_are_found() {
        let body = json!({"data": [{
            "collectTime": JUNE_1_MS,
            "dataItemMap": {"product_power": "812.4", "daily_on_grid_energy": 400.0, "daily_use_energy": 12}
        }]});

        let out = normalize_daily("NE=1", &body);

        assert_eq!(out.generation[0].day_kwh, 812.4);
        assert_eq!(out.meter[0].day_grid_kwh, 400.0);
        assert_eq!(out.meter[0].day_use_kwh, 12.0);
    }

    #[test]
    fn flat_fields_win_over_nested_map() {
        let body = json!({"data": [{
            "collectTime": JUNE_1_MS,
            "inverter_power": 10.0,
            "dataItemMap": {"inverter_power": 99.0}
        }]});

        assert_eq!(normalize_daily("NE=1", &body).generation[0].day_kwh, 10.0);
    }

    #[test]
    fn alias_order_decides_and_nulls_are_skipped() {
        let body = json!({"data": [{
            "collectTime": JUNE_1_MS,
            "dataItemMap": {"inverter_power": null, "product_power": 7.0, "day_power": 8.0}
        }]});

        assert_eq!(normalize_daily("NE=1", &body).generation[0].day_kwh, 7.0);
    }

    #[test]
    fn unknown_metrics_default_to_zero() {
        let body = json!({"data": [{"collectTime": JUNE_1_MS, "dataItemMap": {"radiation_intensity": 4.2}}]});
        let out = normalize_daily("NE=1", &body);

        assert_eq!(out.generation[0].day_kwh, 0.0);
        assert_eq!(out.meter[0].day_use_kwh, 0.0);
        assert_eq!(out.meter[0].day_grid_kwh, 0.0);
    }

    #[test]
    fn alternate_and_nested_record_lists() {
        let datas = json!({"datas": [record(0, 1.0)]});
        let nested = json!({"data": {"records": [record(0, 2.0), record(1, 3.0)]}});
        let nested_alt = json!({"datas": {"records": [record(0, 4.0)]}});

        assert_eq!(normalize_daily("NE=1", &datas).generation.len(), 1);
        assert_eq!(normalize_daily("NE=1", &nested).generation.len(), 2);
        assert_eq!(normalize_daily("NE=1", &nested_alt).generation[0].day_kwh, 4.0);
    }

    #[test]
    fn missing_or_odd_record_lists_are_empty() {
        assert!(normalize_daily("NE=1", &json!({"success": true})).is_empty());
        assert!(normalize_daily("NE=1", &json!({"data": "ACCESS_FREQUENCY_IS_TOO_HIGH"})).is_empty());
        assert!(normalize_daily("NE=1", &json!({"data": {"total": 0}})).is_empty());
        assert!(normalize_daily("NE=1", &json!([])).is_empty());
    }

    #[test]
    fn collect_time_truncates_to_utc_date() {
        // 2023-06-30T23:59:59Z
        let body = json!({"data": [{"collectTime": JUNE_1_MS + 30 * DAY_MS - 1_000}]});
        assert_eq!(normalize_daily("NE=1", &body).generation[0].ddate, date!(2023 - 06 - 30));
    }

    #[test]
    fn snapshot_keeps_source_record() {
        let out = normalize_daily("NE=9", &json!({"data": [record(2, 50.0)]}));
        let snap = &out.generation[0].payload_json;

        assert_eq!(snap["plant_code"], "NE=9");
        assert_eq!(snap["collectTime"], JUNE_1_MS + 2 * DAY_MS);
        assert_eq!(snap["dataItemMap"]["inverter_power"], 50.0);
    }

    #[test]
    fn realtime_sample_from_nested_map() {
        let ts = datetime!(2025-10-01 15:00:00 UTC);
        let body = json!({"success": true, "data": [{
            "stationCode": "NE=1",
            "dataItemMap": {
                "real_health_state": "3",
                "day_power": "215.3",
                "month_power": 4120.0,
                "total_power": 98000.5,
                "realTimePower": 42.1
            }
        }]});

        let sample = normalize_realtime("NE=1", &body, ts).unwrap();

        assert_eq!(sample.plant_name, "NE=1");
        assert_eq!(sample.power_kw, 42.1);
        assert_eq!(sample.day_power_kwh, 215.3);
        assert_eq!(sample.month_power_kwh, 4120.0);
        assert_eq!(sample.total_power_kwh, 98000.5);
        assert_eq!(sample.health, 3);
        assert_eq!(sample.ts_utc, ts);
    }

    #[test]
    fn realtime_without_data_is_none() {
        let ts = datetime!(2025-10-01 15:00:00 UTC);
        assert!(normalize_realtime("NE=1", &json!({"success": true, "data": []}), ts).is_none());
        assert!(normalize_realtime("NE=1", &json!({"success": true}), ts).is_none());
    }

    #[test]
    fn numeric_strings_with_units() {
        assert_eq!(numeric(&json!("12.5 kWh")), Some(12.5));
        assert_eq!(numeric(&json!("n/a")), None);
        assert_eq!(numeric(&json!(true)), None);
    }
}
