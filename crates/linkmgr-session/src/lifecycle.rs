//! Wiring for one link-manager instance.
//!
//! [`SessionLifecycle`] owns the cache, the jitter source, the timer
//! scheduler and the sweeper for a single link manager, so none of them are
//! process-wide singletons.

use std::sync::Arc;

use linkmgr_config::LinkManagerConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::SessionCache;
use crate::clock::{Clock, SystemClock};
use crate::config::ExpiryConfig;
use crate::error::Result;
use crate::jitter::{JitterSource, RandomJitter};
use crate::scheduler::SessionExpirationScheduler;
use crate::store::StateStore;
use crate::sweeper::StaleSessionSweeper;
use crate::timer::{TimerScheduler, TokioTimerScheduler};
use crate::trigger::{
    DEFAULT_TRIGGER_BUFFER, ScheduledTaskTrigger, spawn_periodic_trigger, spawn_sweep_listener,
};

/// Background tasks driving the stale-session sweep.
#[derive(Debug)]
pub struct SweepTasks {
    /// Sender for injecting extra triggers (e.g. from an external scheduler).
    pub triggers: mpsc::Sender<ScheduledTaskTrigger>,
    /// The sweep listener; resolves with `Err` on an unexpected failure.
    pub listener: JoinHandle<Result<()>>,
    /// The periodic trigger producer.
    pub ticker: JoinHandle<()>,
}

impl SweepTasks {
    /// Stop the ticker, close the channel and wait for the listener.
    pub async fn shutdown(self) -> Result<()> {
        self.ticker.abort();
        drop(self.triggers);
        match self.listener.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// Session expiration components for one link-manager instance.
#[derive(Debug)]
pub struct SessionLifecycle {
    cache: Arc<SessionCache>,
    scheduler: SessionExpirationScheduler,
    sweeper: Arc<StaleSessionSweeper>,
    config: ExpiryConfig,
}

impl SessionLifecycle {
    /// Production wiring: tokio timers on the current runtime, wall clock,
    /// OS-seeded jitter.
    pub fn new(store: Arc<dyn StateStore>, config: ExpiryConfig) -> Result<Self> {
        let timers = Arc::new(TokioTimerScheduler::current()?);
        Self::with_components(
            store,
            timers,
            Arc::new(SystemClock),
            Arc::new(RandomJitter::new()),
            config,
        )
    }

    /// Build from a loaded configuration file.
    pub fn from_config(store: Arc<dyn StateStore>, config: &LinkManagerConfig) -> Result<Self> {
        let section = config.session_or_default();
        section.validate()?;
        Self::new(store, ExpiryConfig::from(&section))
    }

    /// Wiring with explicit collaborators.
    pub fn with_components(
        store: Arc<dyn StateStore>,
        timers: Arc<dyn TimerScheduler>,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn JitterSource>,
        config: ExpiryConfig,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(SessionCache::new(store, &config));
        let scheduler = SessionExpirationScheduler::new(
            Arc::clone(&cache),
            timers,
            Arc::clone(&clock),
            jitter,
            &config,
        )?;
        let sweeper = Arc::new(StaleSessionSweeper::new(
            Arc::clone(&cache),
            clock,
            config.sweep_task_name.clone(),
        ));
        debug!(
            lock_shards = config.lock_shards,
            max_jitter_secs = config.max_jitter.as_secs(),
            sweep_task = %config.sweep_task_name,
            "Session lifecycle initialized"
        );
        Ok(Self {
            cache,
            scheduler,
            sweeper,
            config,
        })
    }

    /// The session cache.
    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    /// The expiration scheduler.
    pub fn scheduler(&self) -> &SessionExpirationScheduler {
        &self.scheduler
    }

    /// The stale-session sweeper.
    pub fn sweeper(&self) -> &Arc<StaleSessionSweeper> {
        &self.sweeper
    }

    /// The active configuration.
    pub fn config(&self) -> &ExpiryConfig {
        &self.config
    }

    /// Start the sweep listener and a periodic trigger at the configured
    /// interval. Must be called within a tokio runtime.
    pub fn spawn_sweep_tasks(&self) -> SweepTasks {
        let (triggers, rx) = mpsc::channel(DEFAULT_TRIGGER_BUFFER);
        let listener = spawn_sweep_listener(Arc::clone(&self.sweeper), rx);
        let ticker = spawn_periodic_trigger(
            triggers.clone(),
            self.config.sweep_task_name.clone(),
            self.config.sweep_interval,
        );
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            task = %self.config.sweep_task_name,
            "Stale session sweeping started"
        );
        SweepTasks {
            triggers,
            listener,
            ticker,
        }
    }

    /// Cancel every armed eviction timer. Durable records are kept for the
    /// next owner (or the next sweep) to reclaim.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.cache.cancel_all();
        info!(cancelled = cancelled, "Session lifecycle shut down");
        cancelled
    }
}
