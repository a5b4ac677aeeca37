//! Exponential backoff with jitter.
//!
//! Delay before retry `n` (1-based) is `base × 2^(n-1)`, capped at
//! `max_delay`, then perturbed by up to ± `jitter × delay` so that many
//! clients failing together do not retry in lockstep.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before the given retry, without jitter.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before the given retry, with jitter applied.
    pub fn delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        nominal.mul_f64((1.0 + factor).max(0.0))
    }
}

/// Whether a failed attempt may be repeated.
///
/// Reads retry on any transient failure. Writes retry only when the
/// request provably never reached the upstream (`not_sent`), since a
/// repeated write could duplicate its side effect.
pub fn should_retry(err: &ApiError, idempotent: bool, not_sent: bool) -> bool {
    match err {
        ApiError::Transient(_) | ApiError::Timeout(_) => idempotent || not_sent,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter: 0.2,
        }
    }

    #[test]
    fn test_nominal_delay_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.nominal_delay(1), Duration::from_millis(100));
        assert_eq!(p.nominal_delay(2), Duration::from_millis(200));
        assert_eq!(p.nominal_delay(3), Duration::from_millis(400));
        assert_eq!(p.nominal_delay(4), Duration::from_millis(800));
        assert_eq!(p.nominal_delay(5), Duration::from_millis(1_000));
        assert_eq!(p.nominal_delay(40), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let p = policy();
        for retry in 1..=5 {
            let nominal = p.nominal_delay(retry).as_secs_f64();
            for _ in 0..50 {
                let d = p.delay(retry).as_secs_f64();
                assert!(d >= nominal * 0.8 - 1e-9 && d <= nominal * 1.2 + 1e-9);
            }
        }
    }

    #[test]
    fn test_should_retry_rules() {
        let transient = ApiError::Transient("502".into());
        let timeout = ApiError::Timeout(Duration::from_secs(1));
        let missing = ApiError::NotFound("gone".into());

        assert!(should_retry(&transient, true, false));
        assert!(should_retry(&timeout, true, false));
        assert!(!should_retry(&missing, true, true));

        // writes: only when nothing was sent
        assert!(!should_retry(&transient, false, false));
        assert!(!should_retry(&timeout, false, false));
        assert!(should_retry(&transient, false, true));
    }
}
