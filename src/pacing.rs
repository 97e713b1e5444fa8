//! Randomized request pacing.
//!
//! Every query and every challenge interaction is followed by a pause drawn
//! uniformly from `[min, max]`. Tests use [`Jitter::none`].

use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Lower bound of the default pause
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(3000);

/// Upper bound of the default pause
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(7000);

/// Uniform random pause policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    min: Duration,
    max: Duration,
}

impl Jitter {
    /// Pause uniformly between `min` and `max`; the bounds are swapped if
    /// given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Build from fractional seconds as given on the command line
    pub fn from_secs_f64(min: f64, max: f64) -> Self {
        Self::new(
            Duration::from_secs_f64(min.max(0.0)),
            Duration::from_secs_f64(max.max(0.0)),
        )
    }

    /// Never pause
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw the next pause length
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let millis = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Sleep for a freshly drawn pause
    pub async fn pause(&self) {
        let delay = self.sample();
        if delay.is_zero() {
            return;
        }
        debug!(delay_ms = delay.as_millis() as u64, "Pacing");
        tokio::time::sleep(delay).await;
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELAY, DEFAULT_MAX_DELAY)
    }
}
