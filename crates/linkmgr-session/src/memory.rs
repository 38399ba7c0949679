//! In-memory [`StateStore`] implementation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::trace;

use crate::error::{Error, Result};
use crate::state::SessionState;
use crate::store::{DeleteOutcome, MetadataFilter, StateStore};

/// A process-local, versioned state store.
///
/// Follows the same optimistic-versioning rules as the shared store, so it
/// can stand in for it in tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: RwLock<HashMap<String, SessionState>>,
    fail_queries: AtomicBool,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make metadata queries fail with a transient store error while armed.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Whether a record exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }
}

impl StateStore for InMemoryStateStore {
    fn create(&self, states: &[SessionState]) -> Result<HashSet<String>> {
        let mut records = self.records.write();
        let mut failed = HashSet::new();
        for state in states {
            if records.contains_key(&state.key) {
                failed.insert(state.key.clone());
                continue;
            }
            let mut stored = state.clone();
            stored.modified_time = Utc::now();
            records.insert(state.key.clone(), stored);
            trace!(session_key = %state.key, version = state.version, "Record created");
        }
        Ok(failed)
    }

    fn get(&self, keys: &[&str]) -> Result<HashMap<String, SessionState>> {
        let records = self.records.read();
        Ok(keys
            .iter()
            .filter_map(|key| records.get(*key).map(|s| (s.key.clone(), s.clone())))
            .collect())
    }

    fn update(&self, states: &[SessionState]) -> Result<HashMap<String, SessionState>> {
        let mut records = self.records.write();
        let mut failed = HashMap::new();
        for state in states {
            let Some(current) = records.get_mut(&state.key) else {
                continue;
            };
            if current.version != state.version {
                failed.insert(state.key.clone(), current.clone());
                continue;
            }
            let mut stored = state.clone();
            stored.version = state.version + 1;
            stored.modified_time = Utc::now();
            trace!(session_key = %state.key, version = stored.version, "Record updated");
            *current = stored;
        }
        Ok(failed)
    }

    fn delete(&self, state: &SessionState) -> Result<DeleteOutcome> {
        let mut records = self.records.write();
        match records.get(&state.key) {
            None => Ok(DeleteOutcome::NotFound),
            Some(current) if current.version != state.version => {
                Ok(DeleteOutcome::VersionConflict {
                    current: current.version,
                })
            }
            Some(_) => {
                records.remove(&state.key);
                trace!(session_key = %state.key, version = state.version, "Record deleted");
                Ok(DeleteOutcome::Deleted)
            }
        }
    }

    fn find_by_metadata(&self, filter: &MetadataFilter) -> Result<HashMap<String, SessionState>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::Store("metadata query unavailable".to_string()));
        }
        let records = self.records.read();
        Ok(records
            .values()
            .filter(|s| filter.matches(&s.metadata))
            .map(|s| (s.key.clone(), s.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Metadata;
    use crate::store::Operation;

    fn state(key: &str, expiry_millis: i64) -> SessionState {
        SessionState::new(key, vec![1], Metadata::new().with("expiry", expiry_millis))
    }

    #[test]
    fn test_create_rejects_existing_keys() {
        let store = InMemoryStateStore::new();
        assert!(store.create(&[state("s1", 1)]).unwrap().is_empty());

        let failed = store.create(&[state("s1", 2), state("s2", 2)]).unwrap();
        assert_eq!(failed, HashSet::from(["s1".to_string()]));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_update_bumps_version() {
        let store = InMemoryStateStore::new();
        store.create(&[state("s1", 1)]).unwrap();

        let failed = store.update(&[state("s1", 5)]).unwrap();
        assert!(failed.is_empty());

        let current = store.get(&["s1"]).unwrap().remove("s1").unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.expiry().unwrap().timestamp_millis(), 5);
    }

    #[test]
    fn test_update_with_stale_version_fails() {
        let store = InMemoryStateStore::new();
        store.create(&[state("s1", 1)]).unwrap();
        store.update(&[state("s1", 2)]).unwrap();

        let failed = store.update(&[state("s1", 3)]).unwrap();
        assert_eq!(failed.get("s1").map(|s| s.version), Some(1));
    }

    #[test]
    fn test_delete_outcomes() {
        let store = InMemoryStateStore::new();
        store.create(&[state("s1", 1)]).unwrap();

        assert_eq!(
            store.delete(&state("s1", 1).with_version(4)).unwrap(),
            DeleteOutcome::VersionConflict { current: 0 }
        );
        assert_eq!(store.delete(&state("s1", 1)).unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete(&state("s1", 1)).unwrap(), DeleteOutcome::NotFound);
        assert!(store.is_empty());
    }

    #[test]
    fn test_find_less_than() {
        let store = InMemoryStateStore::new();
        store
            .create(&[state("old", 10), state("edge", 20), state("new", 30)])
            .unwrap();

        let found = store.find_by_metadata_less_than("expiry", 20.into()).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("old"));

        let found = store
            .find_by_metadata(&MetadataFilter::new("expiry", Operation::GreaterThan, 10))
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_query_failure_injection() {
        let store = InMemoryStateStore::new();
        store.fail_queries(true);
        let err = store.find_by_metadata_less_than("expiry", 1.into()).unwrap_err();
        assert!(err.is_transient());

        store.fail_queries(false);
        assert!(store.find_by_metadata_less_than("expiry", 1.into()).is_ok());
    }
}
