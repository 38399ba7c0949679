//! Periodic reconciliation of the durable store.
//!
//! Per-session timers only exist in the process that armed them. Sessions
//! orphaned by a crash, a restart or a partition move have no timer anywhere,
//! so a sweep scans the store for everything already past expiry and forgets
//! it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::cache::SessionCache;
use crate::clock::Clock;
use crate::error::Result;
use crate::events::EvictionReason;
use crate::state::EXPIRY_KEY;
use crate::trigger::ScheduledTaskTrigger;

/// Summary of one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Instant records were compared against.
    pub swept_at: DateTime<Utc>,
    /// Keys of the records this sweep actually removed.
    pub forgotten: Vec<String>,
}

/// Forgets every stored session whose expiry has passed.
pub struct StaleSessionSweeper {
    cache: Arc<SessionCache>,
    clock: Arc<dyn Clock>,
    task_name: String,
}

impl StaleSessionSweeper {
    /// Create a sweeper answering to `task_name`.
    pub fn new(cache: Arc<SessionCache>, clock: Arc<dyn Clock>, task_name: impl Into<String>) -> Self {
        Self {
            cache,
            clock,
            task_name: task_name.into(),
        }
    }

    /// Task name this sweeper reacts to.
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Handle a trigger from the shared scheduled-task channel.
    ///
    /// Triggers for other tasks are ignored (`Ok(None)`). A transient store
    /// failure abandons this cycle and is only logged; anything else is
    /// returned to the caller.
    pub fn on_trigger(&self, trigger: &ScheduledTaskTrigger) -> Result<Option<SweepReport>> {
        if trigger.name != self.task_name {
            trace!(task = %trigger.name, "Ignoring trigger for another task");
            return Ok(None);
        }

        match self.sweep() {
            Ok(report) => Ok(Some(report)),
            Err(e) if e.is_transient() => {
                warn!(
                    task = %trigger.name,
                    error = %e,
                    "Stale session sweep failed, waiting for next trigger"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let stale = self
            .cache
            .store()
            .find_by_metadata_less_than(EXPIRY_KEY, now.timestamp_millis().into())?;

        // Refuse to act on a batch containing records we cannot interpret.
        for state in stale.values() {
            state.expiry()?;
        }

        let matched = stale.len();
        let mut forgotten = Vec::with_capacity(matched);
        for (key, state) in stale {
            debug!(session_key = %key, version = state.version, "Sweeping stale session");
            if self
                .cache
                .forget_state_with_reason(&state, EvictionReason::Swept)
            {
                forgotten.push(key);
            }
        }

        if forgotten.is_empty() {
            debug!(matched = matched, "Stale session sweep forgot nothing");
        } else {
            info!(
                count = forgotten.len(),
                matched = matched,
                "Stale session sweep completed"
            );
        }

        Ok(SweepReport {
            swept_at: now,
            forgotten,
        })
    }
}

impl std::fmt::Debug for StaleSessionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaleSessionSweeper")
            .field("task_name", &self.task_name)
            .finish_non_exhaustive()
    }
}
