//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Smallest accepted polling interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Largest accepted polling interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(600);

/// Tunables for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between reconciliation cycles.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Confirmations the submission pipeline waits for after a send.
    pub confirmation_depth: u32,

    /// Successful cycles a sent entry may stay pending before it fails.
    pub confirmation_timeout_cycles: u32,

    /// Deadline for the send step plus the confirmation wait.
    #[serde(with = "duration_ms")]
    pub submission_timeout: Duration,

    /// Retired overlay entries remembered for status lookups.
    pub retired_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(4),
            confirmation_depth: 1,
            confirmation_timeout_cycles: 3,
            submission_timeout: Duration::from_secs(30),
            retired_history: 256,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables, starting from defaults.
    ///
    /// Reads the following variables:
    /// - `LEDGERVIEW_POLL_INTERVAL_MS` (100-600000, default: 4000)
    /// - `LEDGERVIEW_CONFIRMATION_DEPTH` (default: 1)
    /// - `LEDGERVIEW_CONFIRMATION_TIMEOUT_CYCLES` (default: 3)
    /// - `LEDGERVIEW_SUBMISSION_TIMEOUT_MS` (default: 30000)
    /// - `LEDGERVIEW_RETIRED_HISTORY` (default: 256)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed, or if
    /// the resulting configuration fails [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = env_u64("LEDGERVIEW_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(depth) = env_u32("LEDGERVIEW_CONFIRMATION_DEPTH")? {
            config.confirmation_depth = depth;
        }
        if let Some(cycles) = env_u32("LEDGERVIEW_CONFIRMATION_TIMEOUT_CYCLES")? {
            config.confirmation_timeout_cycles = cycles;
        }
        if let Some(ms) = env_u64("LEDGERVIEW_SUBMISSION_TIMEOUT_MS")? {
            config.submission_timeout = Duration::from_millis(ms);
        }
        if let Some(history) = env_u64("LEDGERVIEW_RETIRED_HISTORY")? {
            config.retired_history = usize::try_from(history).map_err(|_| {
                EngineError::config("LEDGERVIEW_RETIRED_HISTORY does not fit in usize")
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval < MIN_POLL_INTERVAL || self.poll_interval > MAX_POLL_INTERVAL {
            return Err(EngineError::config(format!(
                "poll interval must be between {}ms and {}ms (got {}ms)",
                MIN_POLL_INTERVAL.as_millis(),
                MAX_POLL_INTERVAL.as_millis(),
                self.poll_interval.as_millis()
            )));
        }
        if self.confirmation_depth == 0 {
            return Err(EngineError::config(
                "confirmation depth must be at least 1",
            ));
        }
        if self.confirmation_timeout_cycles == 0 {
            return Err(EngineError::config(
                "confirmation timeout must be at least 1 cycle",
            ));
        }
        if self.submission_timeout.is_zero() {
            return Err(EngineError::config(
                "submission timeout must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Sets the polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the confirmation depth.
    #[must_use]
    pub fn with_confirmation_depth(mut self, depth: u32) -> Self {
        self.confirmation_depth = depth;
        self
    }

    /// Sets the confirmation timeout in cycles.
    #[must_use]
    pub fn with_confirmation_timeout_cycles(mut self, cycles: u32) -> Self {
        self.confirmation_timeout_cycles = cycles;
        self
    }

    /// Sets the submission timeout.
    #[must_use]
    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| EngineError::config(format!("{name} must be a u64: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| EngineError::config(format!("{name} must be a u32: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.confirmation_depth, 1);
        assert_eq!(config.confirmation_timeout_cycles, 3);
    }

    #[test]
    fn rejects_out_of_range_poll_interval() {
        let too_fast = EngineConfig::default().with_poll_interval(Duration::from_millis(5));
        assert!(matches!(too_fast.validate(), Err(EngineError::Config { .. })));

        let too_slow = EngineConfig::default().with_poll_interval(Duration::from_secs(3_600));
        assert!(too_slow.validate().is_err());
    }

    #[test]
    fn rejects_zero_depth_and_timeout() {
        assert!(EngineConfig::default()
            .with_confirmation_depth(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_confirmation_timeout_cycles(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_submission_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn serializes_durations_as_millis() {
        let config = EngineConfig::default().with_poll_interval(Duration::from_millis(2_500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], 2_500);

        let parsed: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn env_parsers_reject_garbage() {
        std::env::set_var("LEDGERVIEW_TEST_GARBAGE_U32", "many");
        assert!(env_u32("LEDGERVIEW_TEST_GARBAGE_U32").is_err());
        std::env::set_var("LEDGERVIEW_TEST_BLANK_U64", "   ");
        assert_eq!(env_u64("LEDGERVIEW_TEST_BLANK_U64").unwrap(), None);
        std::env::remove_var("LEDGERVIEW_TEST_GARBAGE_U32");
        std::env::remove_var("LEDGERVIEW_TEST_BLANK_U64");
    }
}
