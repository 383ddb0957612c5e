use std::time::Duration;

use rand::Rng;

use crate::config::{secs, BackfillConfig, FusionConfig};

/// Waits applied when the vendor signals rate limiting (failCode 407).
///
/// The nominal wait for attempt `n` (1-based) is `base * growth^(n-1)`; the
/// applied wait scales that by a factor in `[1 - jitter, 1 + jitter]` and
/// never drops below `floor`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub growth: f64,
    pub floor: Duration,
    pub max_retries: u32,
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn from_config(cfg: &BackfillConfig) -> Self {
        Self {
            base: secs(cfg.backoff_secs_407),
            growth: cfg.backoff_growth.max(1.0),
            floor: secs(cfg.backoff_floor_secs),
            max_retries: cfg.max_retries_407_per_month,
            jitter: 0.1,
        }
    }

    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.base.mul_f64(self.growth.powi(exponent))
    }

    /// Delay for `attempt` with a jitter `sample` in `[-1, 1]`.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let factor = 1.0 + self.jitter * sample.clamp(-1.0, 1.0);
        self.nominal(attempt).mul_f64(factor).max(self.floor)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_sample(attempt, sample)
    }
}

/// Bounded retries for connection failures and 5xx gateway statuses,
/// independent of the vendor's 305/407 protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRetry {
    pub total: u32,
    pub backoff: Duration,
}

impl NetworkRetry {
    pub const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

    pub fn from_config(cfg: &FusionConfig) -> Self {
        Self {
            total: cfg.net_retry_total,
            backoff: secs(cfg.net_retry_backoff_secs),
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff * 2u32.pow(exponent)
    }
}
