//! Persisted session records.
//!
//! A [`SessionState`] is the versioned form of a negotiated session as it
//! lives in the durable state store: opaque crypto material plus queryable
//! [`Metadata`]. The store assigns versions; this subsystem only reads them.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Metadata field holding the expiry instant (epoch milliseconds).
pub const EXPIRY_KEY: &str = "expiry";

/// Queryable metadata attached to a session record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Value>);

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any previous value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set the expiry instant.
    pub fn with_expiry(self, expiry: DateTime<Utc>) -> Self {
        self.with(EXPIRY_KEY, expiry.timestamp_millis())
    }

    /// Get a raw field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Parse the expiry instant.
    ///
    /// `owner` only labels the error.
    pub fn expiry(&self, owner: &str) -> Result<DateTime<Utc>> {
        let raw = self
            .0
            .get(EXPIRY_KEY)
            .ok_or_else(|| Error::malformed(owner, "missing expiry metadata"))?;
        let millis = raw
            .as_i64()
            .ok_or_else(|| Error::malformed(owner, format!("expiry is not an integer: {raw}")))?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| Error::malformed(owner, format!("expiry out of range: {millis}")))
    }

    /// Iterate over all fields.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// A versioned session record as stored in the durable state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Session identifier.
    pub key: String,

    /// Opaque session crypto material.
    pub value: Vec<u8>,

    /// Store-assigned version, bumped on every successful write.
    pub version: i32,

    /// Queryable metadata (includes `expiry`).
    pub metadata: Metadata,

    /// When the record was last written.
    pub modified_time: DateTime<Utc>,
}

impl SessionState {
    /// Create a new, never-persisted record at version 0.
    pub fn new(key: impl Into<String>, value: Vec<u8>, metadata: Metadata) -> Self {
        Self {
            key: key.into(),
            value,
            version: 0,
            metadata,
            modified_time: Utc::now(),
        }
    }

    /// Set the version.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Copy of this record at the version an in-flight write will produce.
    pub fn with_next_version(&self) -> Self {
        Self {
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Parse this record's expiry instant.
    pub fn expiry(&self) -> Result<DateTime<Utc>> {
        self.metadata.expiry(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_roundtrip_millis() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let state = SessionState::new("s1", vec![], Metadata::new().with_expiry(at));
        assert_eq!(state.expiry().unwrap(), at);
    }

    #[test]
    fn test_missing_expiry_is_malformed() {
        let state = SessionState::new("s1", vec![], Metadata::new().with("peer", "alice"));
        match state.expiry() {
            Err(Error::MalformedRecord { key, .. }) => assert_eq!(key, "s1"),
            other => panic!("expected malformed record, got {other:?}"),
        }
    }

    #[test]
    fn test_non_integer_expiry_is_malformed() {
        let state = SessionState::new("s1", vec![], Metadata::new().with(EXPIRY_KEY, "tomorrow"));
        assert!(matches!(state.expiry(), Err(Error::MalformedRecord { .. })));
    }

    #[test]
    fn test_next_version_only_bumps_version() {
        let expiry = Utc::now() + Duration::seconds(5);
        let state = SessionState::new("s1", vec![7, 7], Metadata::new().with_expiry(expiry))
            .with_version(3);
        let next = state.with_next_version();
        assert_eq!(next.version, 4);
        assert_eq!(next.key, state.key);
        assert_eq!(next.value, state.value);
        assert_eq!(next.metadata, state.metadata);
        assert_eq!(state.version, 3);
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let metadata = Metadata::new().with(EXPIRY_KEY, 42).with("status", "active");
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json, serde_json::json!({"expiry": 42, "status": "active"}));
    }
}
