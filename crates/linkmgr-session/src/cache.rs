//! Process-local registry of armed eviction timers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::config::ExpiryConfig;
use crate::events::{EvictionReason, SessionEvent};
use crate::state::SessionState;
use crate::store::{DeleteOutcome, StateStore};
use crate::timer::TimerHandle;

/// The eviction timer currently armed for one session.
#[derive(Debug, Clone)]
pub struct ScheduledEvictionHandle {
    /// Expiry the timer was armed for.
    pub expiry: DateTime<Utc>,

    /// Record version the timer was armed for.
    pub version: i32,

    timer: Arc<dyn TimerHandle>,
}

impl ScheduledEvictionHandle {
    /// Wrap an armed timer.
    pub fn new(expiry: DateTime<Utc>, version: i32, timer: Arc<dyn TimerHandle>) -> Self {
        Self {
            expiry,
            version,
            timer,
        }
    }

    /// The underlying timer.
    pub fn timer(&self) -> &Arc<dyn TimerHandle> {
        &self.timer
    }

    /// Whether this handle was armed for exactly this expiry and version.
    pub fn matches(&self, expiry: DateTime<Utc>, version: i32) -> bool {
        self.expiry == expiry && self.version == version
    }

    /// Whether both handles wrap the same timer.
    pub fn same_timer(&self, other: &ScheduledEvictionHandle) -> bool {
        Arc::ptr_eq(&self.timer, &other.timer)
    }
}

/// Session cache: at most one armed eviction per session key.
///
/// This is the only code path that destroys sessions. [`forget_state`]
/// removes the in-memory entry, deletes the durable record and broadcasts a
/// [`SessionEvent::Deleted`]; it is idempotent and tolerates either half
/// failing.
///
/// The map itself is guarded by a short-lived mutex. Callers that read an
/// entry, decide, and write it back must serialize per key themselves (the
/// expiration scheduler does so with its lock table).
///
/// [`forget_state`]: SessionCache::forget_state
pub struct SessionCache {
    tasks: Mutex<HashMap<String, ScheduledEvictionHandle>>,
    store: Arc<dyn StateStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionCache {
    /// Create a cache over `store`.
    pub fn new(store: Arc<dyn StateStore>, config: &ExpiryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            tasks: Mutex::new(HashMap::new()),
            store,
            events,
        }
    }

    /// The durable store this cache deletes from.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The handle currently armed for `key`.
    pub fn retrieve_currently_scheduled_task(&self, key: &str) -> Option<ScheduledEvictionHandle> {
        let handle = self.tasks.lock().get(key).cloned();
        trace!(session_key = %key, found = handle.is_some(), "Scheduled eviction lookup");
        handle
    }

    /// Install `handle` for `key`, replacing any previous entry.
    ///
    /// The previous handle is not cancelled here.
    pub fn cache_scheduled_task(&self, key: &str, handle: ScheduledEvictionHandle) {
        trace!(
            session_key = %key,
            version = handle.version,
            expiry = %handle.expiry,
            "Scheduled eviction cached"
        );
        self.tasks.lock().insert(key.to_string(), handle);
    }

    /// Request cancellation of `handle`'s timer, if any.
    ///
    /// Advisory only; the cache entry is left as is.
    pub fn cancel_currently_scheduled_task(&self, handle: Option<&ScheduledEvictionHandle>) {
        if let Some(handle) = handle {
            trace!(version = handle.version, "Cancelling scheduled eviction");
            handle.timer.cancel();
        }
    }

    /// Forget a session at a caller's request.
    pub fn forget_state(&self, state: &SessionState) {
        self.forget_state_with_reason(state, EvictionReason::Explicit);
    }

    /// Forget a session, recording why.
    ///
    /// The cache entry is only removed when it was armed for `state.version`
    /// or an older one, and the store delete is version checked, so a stale
    /// timer firing late cannot destroy a newer session.
    ///
    /// Returns true when the session is gone because of this call: its record
    /// was deleted, or its cache entry was removed and no record was left.
    /// A [`SessionEvent::Deleted`] is broadcast exactly then.
    pub fn forget_state_with_reason(&self, state: &SessionState, reason: EvictionReason) -> bool {
        let removed = {
            let mut tasks = self.tasks.lock();
            match tasks.get(&state.key) {
                Some(handle) if handle.version <= state.version => tasks.remove(&state.key),
                Some(handle) => {
                    debug!(
                        session_key = %state.key,
                        version = state.version,
                        cached_version = handle.version,
                        "Newer eviction armed, keeping cache entry"
                    );
                    None
                }
                None => None,
            }
        };
        if let Some(ref handle) = removed {
            handle.timer.cancel();
        }

        let outcome = match self.store.delete(state) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    session_key = %state.key,
                    version = state.version,
                    error = %e,
                    "Failed to delete session record, leaving it for the sweeper"
                );
                None
            }
        };

        let forgotten = match outcome {
            Some(DeleteOutcome::Deleted) => true,
            Some(DeleteOutcome::NotFound) => {
                trace!(session_key = %state.key, "Session record already gone");
                removed.is_some()
            }
            Some(DeleteOutcome::VersionConflict { current }) => {
                debug!(
                    session_key = %state.key,
                    version = state.version,
                    current_version = current,
                    "Session record superseded, not deleting"
                );
                false
            }
            None => false,
        };

        if !forgotten {
            return false;
        }

        debug!(
            session_key = %state.key,
            version = state.version,
            reason = %reason,
            cache_removed = removed.is_some(),
            "Session forgotten"
        );
        // No subscribers is fine.
        let _ = self.events.send(SessionEvent::Deleted {
            key: state.key.clone(),
            version: state.version,
            reason,
        });
        true
    }

    /// Cancel every armed timer and clear the cache. The store is untouched.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.tasks.lock().drain().collect();
        for (_, handle) in &drained {
            handle.timer.cancel();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "Cancelled all scheduled evictions");
        }
        drained.len()
    }

    /// Number of sessions with an armed eviction.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no eviction is armed.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Keys with an armed eviction.
    pub fn scheduled_keys(&self) -> Vec<String> {
        self.tasks.lock().keys().cloned().collect()
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("scheduled", &self.len())
            .finish_non_exhaustive()
    }
}
