//! Decoded measurements and the clock that stamps them.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One temperature reading.
///
/// `timestamp` is in seconds with sub-second precision, `value` in degrees
/// Celsius as reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

impl Sample {
    #[inline]
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Monotonic clock aligned to wall-clock seconds.
///
/// The UNIX-epoch offset is captured once at construction; after that only
/// monotonic elapsed time is added, so readings never run backwards when the
/// system clock is adjusted mid-session.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
    origin_epoch_secs: f64,
}

impl SessionClock {
    pub fn new() -> Self {
        let origin_epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            origin: Instant::now(),
            origin_epoch_secs,
        }
    }

    /// Current time in seconds.
    pub fn now(&self) -> f64 {
        self.origin_epoch_secs + self.origin.elapsed().as_secs_f64()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
