//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `$LINKMGR_CONFIG_DIR/config.toml`, else `<platform config dir>/linkmgr/config.toml`
//! 2. `./linkmgr.toml` (project-local)

use std::path::{Path, PathBuf};

use crate::{ConfigError, LinkManagerConfig, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "linkmgr.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for platform directory resolution.
const APP_NAME: &str = "linkmgr";

/// Environment variable overriding the user config directory.
const CONFIG_DIR_ENV: &str = "LINKMGR_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file.
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: LinkManagerConfig,
    /// Sources that were checked, in order of precedence (lowest first).
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration by discovering and merging all config layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Load configuration with explicit control over the user config directory.
///
/// `config_dir` overrides both `LINKMGR_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = LinkManagerConfig::new();
    let mut sources = Vec::new();

    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path)?);
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path)?);

    Ok(LoadedConfig { config, sources })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<LinkManagerConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    LinkManagerConfig::from_toml(&contents)
}

/// User config directory: `LINKMGR_CONFIG_DIR` if set, else the platform one.
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Path of the user-level config file.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

fn load_layer(config: &mut LinkManagerConfig, path: &Path) -> Result<ConfigSource> {
    if !path.exists() {
        return Ok(ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        });
    }

    let layer = load_config_file(path)?;
    config.merge(layer);
    Ok(ConfigSource {
        path: path.to_path_buf(),
        loaded: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_files_yields_defaults() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        let loaded = load_config_with_options(Some(project.path()), Some(user.path())).unwrap();
        assert!(loaded.config.session.is_none());
        assert!(loaded.loaded_from().is_empty());
        assert_eq!(loaded.sources.len(), 2);
    }

    #[test]
    fn test_project_overrides_user() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(
            user.path().join(USER_CONFIG_FILE),
            "[session]\nsweep_interval_secs = 600\n",
        )
        .unwrap();
        std::fs::write(
            project.path().join(PROJECT_CONFIG_FILE),
            "[session]\nsweep_interval_secs = 30\n",
        )
        .unwrap();

        let loaded = load_config_with_options(Some(project.path()), Some(user.path())).unwrap();
        assert_eq!(loaded.config.session.as_ref().unwrap().sweep_interval_secs, 30);
        assert_eq!(loaded.loaded_from().len(), 2);
    }

    #[test]
    fn test_user_only() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(
            user.path().join(USER_CONFIG_FILE),
            "[session]\nlock_shards = 16\n",
        )
        .unwrap();

        let loaded = load_config_with_options(Some(project.path()), Some(user.path())).unwrap();
        assert_eq!(loaded.config.session.as_ref().unwrap().lock_shards, 16);
        let expected = user.path().join(USER_CONFIG_FILE);
        assert_eq!(loaded.loaded_from(), vec![expected.as_path()]);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join(PROJECT_CONFIG_FILE), "[session\n").unwrap();

        let result = load_config_with_options(Some(project.path()), Some(user.path()));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = load_config_file(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
