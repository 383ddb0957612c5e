use solar_client::domain::RealtimeSample;
use time::macros::datetime;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Pure validation of a `RealtimeSample`.
///
/// Rules:
/// - power and energy counters must be non-negative.
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_realtime_sample(
    env: Envelope<RealtimeSample>,
) -> Result<Envelope<RealtimeSample>, PipelineError> {
    let s = &env.payload;

    let counters = [
        ("power_kw", s.power_kw),
        ("day_power_kwh", s.day_power_kwh),
        ("month_power_kwh", s.month_power_kwh),
        ("total_power_kwh", s.total_power_kwh),
    ];
    if let Some((field, _)) = counters.iter().find(|(_, v)| *v < 0.0) {
        return Err(PipelineError::Transform(format!(
            "{}: {field} must be non-negative",
            s.plant_code
        )));
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if s.ts_utc < min_ts || s.ts_utc > max_ts {
        return Err(PipelineError::Transform(format!(
            "{}: timestamp out of allowed range",
            s.plant_code
        )));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct RealtimeSampleValidation;

#[async_trait::async_trait]
impl Transform<RealtimeSample, RealtimeSample> for RealtimeSampleValidation {
    async fn apply(
        &self,
        input: Envelope<RealtimeSample>,
    ) -> Result<Envelope<RealtimeSample>, PipelineError> {
        validate_realtime_sample(input).inspect_err(|_| {
            metrics::counter!("fusion_realtime_samples_rejected_total").increment(1);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn env(ts: OffsetDateTime, power_kw: f64, total: f64) -> Envelope<RealtimeSample> {
        Envelope::now(RealtimeSample {
            plant_code: "NE=1".to_string(),
            ts_utc: ts,
            plant_name: "Roof A".to_string(),
            power_kw,
            day_power_kwh: 12.0,
            month_power_kwh: 300.0,
            total_power_kwh: total,
            health: 3,
        })
    }

    #[test]
    fn accepts_valid_sample() {
        let res = validate_realtime_sample(env(datetime!(2024-01-01 00:00:00 UTC), 1.0, 5000.0));
        assert!(res.is_ok());
    }

    #[test]
    fn accepts_idle_plant_at_night() {
        let res = validate_realtime_sample(env(datetime!(2024-01-01 02:00:00 UTC), 0.0, 5000.0));
        assert!(res.is_ok());
    }

    #[test]
    fn rejects_negative_power() {
        let res = validate_realtime_sample(env(datetime!(2024-01-01 00:00:00 UTC), -0.1, 5000.0));
        assert!(matches!(res, Err(PipelineError::Transform(msg)) if msg.contains("power_kw")));
    }

    #[test]
    fn rejects_negative_counter() {
        let res = validate_realtime_sample(env(datetime!(2024-01-01 00:00:00 UTC), 1.0, -1.0));
        assert!(matches!(res, Err(PipelineError::Transform(msg)) if msg.contains("total_power_kwh")));
    }

    #[test]
    fn rejects_out_of_range_ts() {
        let res = validate_realtime_sample(env(datetime!(1800-01-01 00:00:00 UTC), 1.0, 5000.0));
        assert!(matches!(res, Err(PipelineError::Transform(_))));
    }
}
