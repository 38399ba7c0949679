//! Just-in-time session eviction.
//!
//! Every time negotiation code persists a session record it hands the record
//! to [`SessionExpirationScheduler::validate_state_and_schedule_expiry`], which
//! either evicts it on the spot (already past expiry) or arms a one-shot timer
//! that forgets it when it expires. Eviction times are pulled forward by a
//! random amount so sessions created in one burst do not all expire together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::{debug, trace};

use crate::cache::{ScheduledEvictionHandle, SessionCache};
use crate::clock::Clock;
use crate::config::ExpiryConfig;
use crate::error::{Error, Result};
use crate::events::EvictionReason;
use crate::jitter::JitterSource;
use crate::locks::KeyLocks;
use crate::state::SessionState;
use crate::timer::TimerScheduler;

/// Validates session expiry and keeps exactly one eviction timer per session.
pub struct SessionExpirationScheduler {
    cache: Arc<SessionCache>,
    timers: Arc<dyn TimerScheduler>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    locks: KeyLocks,
    max_jitter: TimeDelta,
}

impl SessionExpirationScheduler {
    /// Create a scheduler.
    pub fn new(
        cache: Arc<SessionCache>,
        timers: Arc<dyn TimerScheduler>,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn JitterSource>,
        config: &ExpiryConfig,
    ) -> Result<Self> {
        config.validate()?;
        let max_jitter = TimeDelta::from_std(config.max_jitter)
            .map_err(|_| Error::Config(format!("max_jitter out of range: {:?}", config.max_jitter)))?;
        Ok(Self {
            cache,
            timers,
            clock,
            jitter,
            locks: KeyLocks::new(config.lock_shards),
            max_jitter,
        })
    }

    /// The cache this scheduler arms timers in.
    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    /// Validate one session and (re)arm its eviction.
    ///
    /// With `before_update`, the record is treated as the version the caller
    /// is about to write (`version + 1`), so the armed timer matches the
    /// record once that write lands.
    ///
    /// Returns `Ok(None)` when the session had already expired and has been
    /// forgotten; the caller must not keep it. Otherwise returns `state`
    /// unchanged.
    pub fn validate_state_and_schedule_expiry(
        &self,
        state: SessionState,
        before_update: bool,
    ) -> Result<Option<SessionState>> {
        let effective = if before_update {
            state.with_next_version()
        } else {
            state.clone()
        };
        let expiry = effective.expiry()?;

        let _guard = self.locks.lock(&effective.key);

        let noise = self.noise();
        let delay = (expiry - self.clock.now()) - noise;

        if delay < TimeDelta::zero() {
            debug!(
                session_key = %effective.key,
                version = effective.version,
                expiry = %expiry,
                "Session past expiry, evicting now"
            );
            self.cache
                .forget_state_with_reason(&effective, EvictionReason::Expired);
            return Ok(None);
        }

        let current = self.cache.retrieve_currently_scheduled_task(&effective.key);
        if let Some(handle) = current.as_ref()
            && handle.matches(expiry, effective.version)
        {
            trace!(
                session_key = %effective.key,
                version = effective.version,
                "Eviction already armed for this version"
            );
            self.cache
                .cache_scheduled_task(&effective.key, handle.clone());
            return Ok(Some(state));
        }

        self.cache.cancel_currently_scheduled_task(current.as_ref());

        let delay = delay.to_std().unwrap_or(Duration::ZERO);
        let cache = Arc::clone(&self.cache);
        let target = effective.clone();
        let timer = self.timers.schedule(
            delay,
            Box::new(move || {
                cache.forget_state_with_reason(&target, EvictionReason::Expired);
            }),
        );
        self.cache.cache_scheduled_task(
            &effective.key,
            ScheduledEvictionHandle::new(expiry, effective.version, timer),
        );

        debug!(
            session_key = %effective.key,
            version = effective.version,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            noise_ms = noise.num_milliseconds(),
            replaced = current.is_some(),
            "Session eviction scheduled"
        );

        Ok(Some(state))
    }

    /// Validate a batch of sessions.
    ///
    /// Returns only the sessions that were not evicted.
    pub fn validate_states_and_schedule_expiry(
        &self,
        states: HashMap<String, SessionState>,
    ) -> Result<HashMap<String, SessionState>> {
        let total = states.len();
        let mut survivors = HashMap::with_capacity(total);
        for (key, state) in states {
            if let Some(state) = self.validate_state_and_schedule_expiry(state, false)? {
                survivors.insert(key, state);
            }
        }
        trace!(
            total = total,
            evicted = total - survivors.len(),
            "Validated session batch"
        );
        Ok(survivors)
    }

    fn noise(&self) -> TimeDelta {
        let max = self.max_jitter.to_std().unwrap_or(Duration::ZERO);
        // Bounded by max_jitter, which fits in a TimeDelta.
        TimeDelta::from_std(self.jitter.noise(max)).unwrap_or(self.max_jitter)
    }
}

impl std::fmt::Debug for SessionExpirationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionExpirationScheduler")
            .field("cache", &self.cache)
            .field("lock_shards", &self.locks.shard_count())
            .field("max_jitter", &self.max_jitter)
            .finish_non_exhaustive()
    }
}
