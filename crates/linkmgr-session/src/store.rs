//! Durable state store contract.
//!
//! The store is shared by every worker in the cluster and coordinates writers
//! purely through optimistic versioning. This module defines the subset of its
//! contract the session subsystem relies on; [`InMemoryStateStore`] is the
//! process-local implementation.
//!
//! [`InMemoryStateStore`]: crate::memory::InMemoryStateStore

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::Result;
use crate::state::{Metadata, SessionState};

/// Comparison applied by a [`MetadataFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
}

/// A single-field metadata predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    /// Metadata field to compare.
    pub key: String,
    /// Comparison to apply.
    pub operation: Operation,
    /// Right-hand side of the comparison.
    pub value: Value,
}

impl MetadataFilter {
    /// Create a new filter.
    pub fn new(key: impl Into<String>, operation: Operation, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            operation,
            value: value.into(),
        }
    }

    /// Whether `metadata` satisfies this filter.
    ///
    /// Records without the field never match. Numbers compare numerically and
    /// strings lexicographically; ordering comparisons across types never match.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let Some(actual) = metadata.get(&self.key) else {
            return false;
        };
        match self.operation {
            Operation::Equals => compare(actual, &self.value) == Some(Ordering::Equal),
            Operation::NotEquals => compare(actual, &self.value) != Some(Ordering::Equal),
            Operation::GreaterThan => compare(actual, &self.value) == Some(Ordering::Greater),
            Operation::LessThan => compare(actual, &self.value) == Some(Ordering::Less),
        }
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
        },
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (l, r) if l == r => Some(Ordering::Equal),
        _ => None,
    }
}

/// Outcome of a version-checked delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record existed at the expected version and was removed.
    Deleted,
    /// No record exists under the key.
    NotFound,
    /// The record exists at a different version and was left in place.
    VersionConflict { current: i32 },
}

/// Trait for durable, versioned session state stores.
///
/// Implementations must be safe to call from timer worker threads.
pub trait StateStore: Send + Sync {
    /// Insert records that do not exist yet.
    ///
    /// Returns the keys that already existed and were therefore not written.
    fn create(&self, states: &[SessionState]) -> Result<HashSet<String>>;

    /// Fetch records by key. Missing keys are absent from the result.
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, SessionState>>;

    /// Update records whose `version` matches the stored version.
    ///
    /// On success the stored version becomes `version + 1`. Returns the
    /// current stored record for every key that failed the check; keys with
    /// no stored record are not written and not reported.
    fn update(&self, states: &[SessionState]) -> Result<HashMap<String, SessionState>>;

    /// Delete a record if it is still at `state.version`.
    fn delete(&self, state: &SessionState) -> Result<DeleteOutcome>;

    /// Find every record whose metadata satisfies `filter`.
    fn find_by_metadata(&self, filter: &MetadataFilter) -> Result<HashMap<String, SessionState>>;

    /// Find every record whose `field` is strictly less than `threshold`.
    fn find_by_metadata_less_than(
        &self,
        field: &str,
        threshold: Value,
    ) -> Result<HashMap<String, SessionState>> {
        self.find_by_metadata(&MetadataFilter::new(field, Operation::LessThan, threshold))
    }
}
