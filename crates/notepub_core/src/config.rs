//! Publish tracker configuration.
//!
//! # Invariants
//! - `sweep_interval` is both the timer period and the expiry threshold.
//! - Validated configs have a non-zero interval no longer than one hour.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Default sweep period and callback expiry.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroSweepInterval,
    SweepIntervalTooLarge { requested_ms: u128, max_ms: u128 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroSweepInterval => write!(f, "sweep interval must be greater than zero"),
            Self::SweepIntervalTooLarge {
                requested_ms,
                max_ms,
            } => write!(
                f,
                "sweep interval {requested_ms}ms exceeds maximum {max_ms}ms"
            ),
        }
    }
}

impl Error for ConfigError {}

/// Tunables for `PublishController`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishConfig {
    /// Timer period; pending callbacks older than this are dropped.
    pub sweep_interval: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl PublishConfig {
    /// Builds a validated config from a millisecond interval.
    pub fn from_millis(sweep_interval_ms: u64) -> Result<Self, ConfigError> {
        let config = Self {
            sweep_interval: Duration::from_millis(sweep_interval_ms),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.sweep_interval > MAX_SWEEP_INTERVAL {
            return Err(ConfigError::SweepIntervalTooLarge {
                requested_ms: self.sweep_interval.as_millis(),
                max_ms: MAX_SWEEP_INTERVAL.as_millis(),
            });
        }
        Ok(())
    }

    /// Interval in milliseconds, saturating at `i64::MAX`.
    pub fn sweep_interval_ms(&self) -> i64 {
        i64::try_from(self.sweep_interval.as_millis()).unwrap_or(i64::MAX)
    }
}
