//! Acquisition tuning: poll cadence, read window, fault threshold and buffer
//! policy. Loaded from JSON with every field optional.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::buffer::BufferConfig;
use crate::errors::ConfigError;
use crate::port::{DEFAULT_READ_DEADLINE, DEFAULT_READ_SLICE};

/// One request/response cycle per second.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Consecutive write failures that fault the scheduler.
pub const DEFAULT_MAX_WRITE_FAILURES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    #[serde(rename = "poll_period_ms", with = "millis")]
    pub poll_period: Duration,
    #[serde(rename = "read_deadline_ms", with = "millis")]
    pub read_deadline: Duration,
    #[serde(rename = "read_slice_ms", with = "millis")]
    pub read_slice: Duration,
    pub max_write_failures: u32,
    pub buffer: BufferConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_period: DEFAULT_POLL_PERIOD,
            read_deadline: DEFAULT_READ_DEADLINE,
            read_slice: DEFAULT_READ_SLICE,
            max_write_failures: DEFAULT_MAX_WRITE_FAILURES,
            buffer: BufferConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_period.is_zero() {
            return Err(ConfigError::Invalid("poll period must be non-zero".into()));
        }
        if self.read_deadline.is_zero() || self.read_slice.is_zero() {
            return Err(ConfigError::Invalid(
                "read deadline and read slice must be non-zero".into(),
            ));
        }
        if self.read_deadline >= self.poll_period {
            return Err(ConfigError::Invalid(format!(
                "read deadline {:?} must be shorter than the poll period {:?}",
                self.read_deadline, self.poll_period
            )));
        }
        if self.max_write_failures == 0 {
            return Err(ConfigError::Invalid(
                "max write failures must be at least 1".into(),
            ));
        }
        let BufferConfig {
            window_span,
            min_spacing,
        } = self.buffer;
        if !(window_span.is_finite() && window_span > 0.0) {
            return Err(ConfigError::Invalid("window span must be positive".into()));
        }
        if !(min_spacing.is_finite() && min_spacing >= 0.0) {
            return Err(ConfigError::Invalid(
                "min spacing must not be negative".into(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
