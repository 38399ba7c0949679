//! Runtime configuration for session expiration.

use std::time::Duration;

use linkmgr_config::{DEFAULT_SWEEP_TASK_NAME, SessionExpirySection};

use crate::error::{Error, Result};

/// Default upper bound of the eviction noise.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(20 * 60);

/// Default interval between stale-session sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Default number of shards in the per-key lock table.
pub const DEFAULT_LOCK_SHARDS: usize = 64;

/// Default capacity of the session event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Configuration for the session expiration subsystem.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Eviction delays are shortened by a random amount in `[0, max_jitter)`.
    pub max_jitter: Duration,

    /// Interval between stale-session sweep triggers.
    pub sweep_interval: Duration,

    /// Scheduled task name the sweeper reacts to.
    pub sweep_task_name: String,

    /// Number of shards in the per-key lock table.
    pub lock_shards: usize,

    /// Capacity of the session event broadcast channel.
    pub event_buffer: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            max_jitter: DEFAULT_MAX_JITTER,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_task_name: DEFAULT_SWEEP_TASK_NAME.to_string(),
            lock_shards: DEFAULT_LOCK_SHARDS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ExpiryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the upper bound of the eviction noise.
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the task name the sweeper answers to.
    pub fn with_sweep_task_name(mut self, name: impl Into<String>) -> Self {
        self.sweep_task_name = name.into();
        self
    }

    /// Set the number of lock shards.
    pub fn with_lock_shards(mut self, shards: usize) -> Self {
        self.lock_shards = shards;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.lock_shards == 0 {
            return Err(Error::Config("lock_shards must be at least 1".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(Error::Config("event_buffer must be at least 1".to_string()));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("sweep_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl From<&SessionExpirySection> for ExpiryConfig {
    fn from(section: &SessionExpirySection) -> Self {
        Self {
            max_jitter: Duration::from_secs(section.max_jitter_secs),
            sweep_interval: Duration::from_secs(section.sweep_interval_secs),
            sweep_task_name: section.sweep_task_name.clone(),
            lock_shards: section.lock_shards,
            event_buffer: section.event_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_file_defaults() {
        let from_file = ExpiryConfig::from(&SessionExpirySection::default());
        let default = ExpiryConfig::default();
        assert_eq!(from_file.max_jitter, default.max_jitter);
        assert_eq!(from_file.sweep_interval, default.sweep_interval);
        assert_eq!(from_file.sweep_task_name, default.sweep_task_name);
        assert_eq!(from_file.lock_shards, default.lock_shards);
        assert_eq!(from_file.event_buffer, default.event_buffer);
    }

    #[test]
    fn test_default_jitter_is_twenty_minutes() {
        assert_eq!(ExpiryConfig::new().max_jitter, Duration::from_secs(1200));
    }

    #[test]
    fn test_builder() {
        let config = ExpiryConfig::new()
            .with_max_jitter(Duration::ZERO)
            .with_lock_shards(4)
            .with_sweep_task_name("sweep");
        assert!(config.max_jitter.is_zero());
        assert_eq!(config.lock_shards, 4);
        assert_eq!(config.sweep_task_name, "sweep");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_shards() {
        let config = ExpiryConfig::new().with_lock_shards(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
