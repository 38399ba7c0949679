//! Scheduled-task trigger channel.
//!
//! The platform's scheduled-task service fans named triggers out over one
//! shared channel. [`spawn_sweep_listener`] feeds them to a
//! [`StaleSessionSweeper`]; [`spawn_periodic_trigger`] produces them on a
//! fixed cadence where no such service exists.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::sweeper::StaleSessionSweeper;

/// Default buffer size for the trigger channel.
pub const DEFAULT_TRIGGER_BUFFER: usize = 16;

/// A named scheduled task firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTaskTrigger {
    /// Name of the task that fired.
    pub name: String,
    /// When it fired.
    pub fired_at: DateTime<Utc>,
}

impl ScheduledTaskTrigger {
    /// Trigger for `name`, fired now.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fired_at: Utc::now(),
        }
    }
}

/// Drive `sweeper` from `triggers` until the channel closes.
///
/// Each sweep runs on the blocking worker pool, one at a time.
///
/// The task ends with `Err` on the first error the sweeper does not absorb
/// itself, leaving restart policy to whoever owns the handle.
pub fn spawn_sweep_listener(
    sweeper: Arc<StaleSessionSweeper>,
    mut triggers: mpsc::Receiver<ScheduledTaskTrigger>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        info!(task = %sweeper.task_name(), "Stale session sweep listener started");
        while let Some(trigger) = triggers.recv().await {
            // Store scans and deletes block; keep them off the async workers.
            let worker = Arc::clone(&sweeper);
            let name = trigger.name.clone();
            let outcome = tokio::task::spawn_blocking(move || worker.on_trigger(&trigger)).await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!(task = %name, error = %e, "Stale session sweep aborted");
                    return Err(e);
                }
                Err(e) if e.is_panic() => {
                    error!(task = %name, "Stale session sweep panicked");
                    std::panic::resume_unwind(e.into_panic());
                }
                Err(_) => {
                    debug!(task = %name, "Sweep cancelled by runtime shutdown, listener stopping");
                    return Ok(());
                }
            }
        }
        debug!("Trigger channel closed, sweep listener stopping");
        Ok(())
    })
}

/// Send a trigger named `name` every `interval`, starting immediately.
///
/// Stops when every receiver is gone.
pub fn spawn_periodic_trigger(
    triggers: mpsc::Sender<ScheduledTaskTrigger>,
    name: impl Into<String>,
    interval: Duration,
) -> JoinHandle<()> {
    let name = name.into();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if triggers
                .send(ScheduledTaskTrigger::new(name.clone()))
                .await
                .is_err()
            {
                debug!(task = %name, "Trigger receiver dropped, stopping");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SessionCache;
    use crate::clock::SystemClock;
    use crate::config::ExpiryConfig;
    use crate::memory::InMemoryStateStore;
    use crate::state::{Metadata, SessionState};
    use crate::store::{DeleteOutcome, MetadataFilter, StateStore};
    use chrono::TimeDelta;
    use std::collections::{HashMap, HashSet};

    fn sweeper(store: Arc<InMemoryStateStore>) -> Arc<StaleSessionSweeper> {
        let cache = Arc::new(SessionCache::new(store, &ExpiryConfig::default()));
        Arc::new(StaleSessionSweeper::new(cache, Arc::new(SystemClock), "sweep"))
    }

    fn stale(key: &str) -> SessionState {
        SessionState::new(
            key,
            vec![],
            Metadata::new().with_expiry(Utc::now() - TimeDelta::minutes(5)),
        )
    }

    #[tokio::test]
    async fn test_listener_sweeps_on_matching_trigger() {
        let store = Arc::new(InMemoryStateStore::new());
        store.create(&[stale("a"), stale("b")]).unwrap();
        let (tx, rx) = mpsc::channel(DEFAULT_TRIGGER_BUFFER);
        let listener = spawn_sweep_listener(sweeper(store.clone()), rx);

        tx.send(ScheduledTaskTrigger::new("unrelated")).await.unwrap();
        tx.send(ScheduledTaskTrigger::new("sweep")).await.unwrap();
        drop(tx);

        listener.await.unwrap().unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_listener_survives_store_outage() {
        let store = Arc::new(InMemoryStateStore::new());
        store.create(&[stale("a")]).unwrap();
        store.fail_queries(true);
        let (tx, rx) = mpsc::channel(DEFAULT_TRIGGER_BUFFER);
        let listener = spawn_sweep_listener(sweeper(store.clone()), rx);

        tx.send(ScheduledTaskTrigger::new("sweep")).await.unwrap();
        drop(tx);

        listener.await.unwrap().unwrap();
        assert!(store.contains("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_trigger_cadence() {
        let (tx, mut rx) = mpsc::channel(DEFAULT_TRIGGER_BUFFER);
        let ticker = spawn_periodic_trigger(tx, "sweep", Duration::from_secs(60));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "sweep");

        let before = tokio::time::Instant::now();
        rx.recv().await.unwrap();
        assert!(before.elapsed() >= Duration::from_secs(60));

        drop(rx);
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(ticker.is_finished());
    }

    /// Store whose metadata queries take a while.
    struct SlowStore {
        inner: InMemoryStateStore,
        query_time: Duration,
    }

    impl StateStore for SlowStore {
        fn create(&self, states: &[SessionState]) -> Result<HashSet<String>> {
            self.inner.create(states)
        }

        fn get(&self, keys: &[&str]) -> Result<HashMap<String, SessionState>> {
            self.inner.get(keys)
        }

        fn update(&self, states: &[SessionState]) -> Result<HashMap<String, SessionState>> {
            self.inner.update(states)
        }

        fn delete(&self, state: &SessionState) -> Result<DeleteOutcome> {
            self.inner.delete(state)
        }

        fn find_by_metadata(&self, filter: &MetadataFilter) -> Result<HashMap<String, SessionState>> {
            std::thread::sleep(self.query_time);
            self.inner.find_by_metadata(filter)
        }
    }

    #[tokio::test]
    async fn test_slow_sweep_does_not_stall_runtime() {
        let store = Arc::new(SlowStore {
            inner: InMemoryStateStore::new(),
            query_time: Duration::from_millis(500),
        });
        store.create(&[stale("a")]).unwrap();
        let cache = Arc::new(SessionCache::new(store.clone(), &ExpiryConfig::default()));
        let sweeper = Arc::new(StaleSessionSweeper::new(cache, Arc::new(SystemClock), "sweep"));
        let (tx, rx) = mpsc::channel(DEFAULT_TRIGGER_BUFFER);
        let listener = spawn_sweep_listener(sweeper, rx);

        tx.send(ScheduledTaskTrigger::new("sweep")).await.unwrap();
        // Let the listener pick the trigger up.
        tokio::task::yield_now().await;

        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(300));

        drop(tx);
        listener.await.unwrap().unwrap();
        assert!(store.inner.is_empty());
    }
}
