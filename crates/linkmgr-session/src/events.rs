//! Notifications emitted when sessions are destroyed.

use serde::{Deserialize, Serialize};

/// Why a session was forgotten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionReason {
    /// Its expiry passed, either at validation time or when its timer fired.
    Expired,
    /// The stale-session sweep found it past expiry.
    Swept,
    /// A caller forgot it directly.
    Explicit,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Expired => write!(f, "expired"),
            EvictionReason::Swept => write!(f, "swept"),
            EvictionReason::Explicit => write!(f, "explicit"),
        }
    }
}

/// Event broadcast to downstream consumers of session lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session was removed from the cache, the store, or both.
    Deleted {
        key: String,
        version: i32,
        reason: EvictionReason,
    },
}

impl SessionEvent {
    /// Key of the session the event is about.
    pub fn key(&self) -> &str {
        match self {
            SessionEvent::Deleted { key, .. } => key,
        }
    }
}
