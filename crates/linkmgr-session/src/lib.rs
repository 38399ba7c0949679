//! Session lifecycle and expiration for the peer-to-peer link manager.
//!
//! Once two peers finish negotiating a session, the session record lives in
//! a durable, cluster-shared state store until it expires. This crate
//! provides:
//! - A per-process cache holding exactly one eviction timer per session
//! - Just-in-time eviction with jittered timers and version-aware,
//!   idempotent forgetting
//! - A periodic sweep that reclaims sessions no timer is watching
//!
//! # Example
//!
//! ```rust,ignore
//! use linkmgr_session::{ExpiryConfig, InMemoryStateStore, SessionLifecycle};
//!
//! let lifecycle = SessionLifecycle::new(Arc::new(InMemoryStateStore::new()), ExpiryConfig::default())?;
//! let sweeping = lifecycle.spawn_sweep_tasks();
//!
//! if let Some(state) = lifecycle.scheduler().validate_state_and_schedule_expiry(state, false)? {
//!     // still valid, keep using it
//! }
//! ```

mod cache;
mod clock;
mod config;
mod error;
mod events;
mod jitter;
mod lifecycle;
mod locks;
mod memory;
mod scheduler;
mod state;
mod store;
mod sweeper;
mod timer;
mod trigger;

pub use cache::{ScheduledEvictionHandle, SessionCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ExpiryConfig;
pub use error::{Error, Result};
pub use events::{EvictionReason, SessionEvent};
pub use jitter::{FixedJitter, JitterSource, RandomJitter};
pub use lifecycle::{SessionLifecycle, SweepTasks};
pub use locks::KeyLocks;
pub use memory::InMemoryStateStore;
pub use scheduler::SessionExpirationScheduler;
pub use state::{EXPIRY_KEY, Metadata, SessionState};
pub use store::{DeleteOutcome, MetadataFilter, Operation, StateStore};
pub use sweeper::{StaleSessionSweeper, SweepReport};
pub use timer::{
    EvictionTask, ManualTimer, ManualTimerScheduler, TimerHandle, TimerScheduler,
    TokioTimerScheduler,
};
pub use trigger::{
    DEFAULT_TRIGGER_BUFFER, ScheduledTaskTrigger, spawn_periodic_trigger, spawn_sweep_listener,
};
