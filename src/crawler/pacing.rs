//! Politeness delays between requests

use crate::config::PacingConfig;
use rand::Rng;
use std::time::Duration;

/// Delays applied between detail items and between listing page groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub item_delay: Duration,
    pub batch_delay_min: Duration,
    pub batch_delay_max: Duration,
}

impl Pacing {
    pub fn from_config(config: &PacingConfig) -> Self {
        Self {
            item_delay: Duration::from_millis(config.item_delay_ms),
            batch_delay_min: Duration::from_millis(config.batch_delay_min_ms),
            batch_delay_max: Duration::from_millis(config.batch_delay_max_ms),
        }
    }

    /// No waiting at all
    pub fn none() -> Self {
        Self {
            item_delay: Duration::ZERO,
            batch_delay_min: Duration::ZERO,
            batch_delay_max: Duration::ZERO,
        }
    }

    /// Delay after one extracted item: the base delay scaled by 1.5 to 2.5
    pub fn item_delay(&self) -> Duration {
        jittered_delay(self.item_delay, rand::thread_rng().gen::<f64>())
    }

    /// Delay between two listing page groups, uniform in `[min, max]`
    pub fn batch_delay(&self) -> Duration {
        if self.batch_delay_max <= self.batch_delay_min {
            return self.batch_delay_min;
        }

        let min = self.batch_delay_min.as_millis() as u64;
        let max = self.batch_delay_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Scales `base` by `1.5 + fraction`, with `fraction` clamped to `[0, 1]`
pub fn jittered_delay(base: Duration, fraction: f64) -> Duration {
    base.mul_f64(1.5 + fraction.clamp(0.0, 1.0))
}
