//! Construction parameters for a [`TimingWheel`](crate::TimingWheel).

use std::time::Duration;

use crate::errors::TimerError;

/// Shape of a timing wheel: how many slots it has and how long one tick lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelConfig {
    /// Number of slots in the wheel.
    pub slot_count: usize,
    /// Time covered by one slot, which is also the driver's tick period.
    pub slot_interval: Duration,
}

impl WheelConfig {
    /// Creates a configuration without validating it.
    pub fn new(slot_count: usize, slot_interval: Duration) -> Self {
        WheelConfig {
            slot_count,
            slot_interval,
        }
    }

    /// Checks that both the slot count and the interval are non-zero.
    pub fn validate(&self) -> Result<(), TimerError> {
        if self.slot_count == 0 {
            return Err(TimerError::Configuration(
                "Slot count must be greater than zero.".into(),
            ));
        }
        if self.slot_interval.is_zero() {
            return Err(TimerError::Configuration(
                "Slot interval must be greater than zero.".into(),
            ));
        }
        Ok(())
    }

    /// Time taken by one full sweep of the wheel.
    pub fn round_duration(&self) -> Duration {
        let slots = u32::try_from(self.slot_count).unwrap_or(u32::MAX);
        self.slot_interval.saturating_mul(slots)
    }

    /// Number of whole ticks in `delay`, rounded down.
    pub(crate) fn ticks_for(&self, delay: Duration) -> u128 {
        delay.as_nanos() / self.slot_interval.as_nanos()
    }
}

impl Default for WheelConfig {
    fn default() -> Self {
        WheelConfig::new(60, Duration::from_secs(1))
    }
}
