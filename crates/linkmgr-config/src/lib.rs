//! Configuration system for the link manager session subsystem.
//!
//! Provides TOML-based configuration with:
//! - A `[session]` section controlling expiry jitter, the stale-session
//!   sweep and the per-key lock table
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, user_config_dir,
    user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
