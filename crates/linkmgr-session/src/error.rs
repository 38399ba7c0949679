//! Error types for session lifecycle operations.

/// Error type for session lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The durable state store failed (query, write or delete).
    #[error("State store error: {0}")]
    Store(String),

    /// A record is missing required metadata or carries an unusable value.
    #[error("Malformed session record '{key}': {reason}")]
    MalformedRecord { key: String, reason: String },

    /// Timers were requested outside of a tokio runtime.
    #[error("No tokio runtime available for eviction timers")]
    NoRuntime,

    /// Invalid runtime configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a malformed-record error.
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for failures the next sweep is expected to recover from.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<linkmgr_config::ConfigError> for Error {
    fn from(err: linkmgr_config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for session lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_errors_are_transient() {
        assert!(Error::Store("connection reset".to_string()).is_transient());
        assert!(!Error::malformed("s1", "missing expiry").is_transient());
        assert!(!Error::NoRuntime.is_transient());
        assert!(!Error::Config("bad".to_string()).is_transient());
    }

    #[test]
    fn test_malformed_display() {
        let err = Error::malformed("s1", "missing expiry");
        assert_eq!(
            err.to_string(),
            "Malformed session record 's1': missing expiry"
        );
    }
}
