//! Configuration types.
//!
//! ```toml
//! [session]
//! max_jitter_secs = 1200
//! sweep_interval_secs = 300
//! sweep_task_name = "link-manager-session-expiry"
//! lock_shards = 64
//! event_buffer = 1024
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Task name the stale-session sweeper answers to on the trigger channel.
pub const DEFAULT_SWEEP_TASK_NAME: &str = "link-manager-session-expiry";

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkManagerConfig {
    /// Session lifecycle and expiration settings.
    pub session: Option<SessionExpirySection>,
}

impl LinkManagerConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        if let Some(ref session) = config.session {
            session.validate()?;
        }
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: LinkManagerConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }
    }

    /// The session section, or its defaults when absent.
    pub fn session_or_default(&self) -> SessionExpirySection {
        self.session.clone().unwrap_or_default()
    }
}

/// `[session]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionExpirySection {
    /// Upper bound (exclusive) of the random noise subtracted from each
    /// eviction delay, in seconds.
    pub max_jitter_secs: u64,
    /// Interval in seconds between stale-session sweep triggers.
    pub sweep_interval_secs: u64,
    /// Name of the scheduled task that triggers a sweep.
    pub sweep_task_name: String,
    /// Number of shards in the per-key lock table.
    pub lock_shards: usize,
    /// Capacity of the session event broadcast channel.
    pub event_buffer: usize,
}

impl Default for SessionExpirySection {
    fn default() -> Self {
        Self {
            max_jitter_secs: 20 * 60,
            sweep_interval_secs: 300,
            sweep_task_name: DEFAULT_SWEEP_TASK_NAME.to_string(),
            lock_shards: 64,
            event_buffer: 1024,
        }
    }
}

impl SessionExpirySection {
    /// Reject values the session subsystem cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.lock_shards == 0 {
            return Err(ConfigError::Invalid {
                field: "session.lock_shards".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "session.event_buffer".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "session.sweep_interval_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sweep_task_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "session.sweep_task_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
