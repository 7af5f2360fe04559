//! Capped exponential backoff with symmetric jitter.

use std::time::Duration;

use thinclient_settings::ReconnectSettings;

/// Delay schedule between reconnection attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any delay, jitter included.
    pub max: Duration,
    /// Fraction of the delay randomized in either direction (0.0–1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for BackoffPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            base: Duration::from_millis(settings.base_delay_ms),
            max: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_random(attempt, rand::random::<f64>())
    }

    /// Deterministic variant; `random` is expected in `[0.0, 1.0)`.
    ///
    /// Formula: `min(max, min(max, base * 2^attempt) * (1 + (2r - 1) * jitter))`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX).max(1);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let exponential = base_ms.saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(max_ms);

        let jitter = 1.0 + (random.clamp(0.0, 1.0) * 2.0 - 1.0) * self.jitter_factor;
        let with_jitter = ((capped as f64) * jitter).round().max(1.0) as u64;
        Duration::from_millis(with_jitter.min(max_ms.max(1)))
    }
}
