//! Configuration loader with hierarchical merging.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Global config (`~/.digs/config.toml`)
//! 3. Project config (`.digs/config.toml`)
//! 4. Environment variables (`DIGS_*`)
//!
//! Each layer overrides the previous.

use super::{
    default_config_path, ConfigError, DigsConfig, WorkerMode, PROJECT_CONFIG_DIR,
    PROJECT_CONFIG_FILE,
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Helper macro for parsing boolean environment variables.
macro_rules! parse_env_bool {
    ($lookup:expr, $field:expr, $var:literal) => {
        if let Some(val) = $lookup($var) {
            $field = parse_bool(&val)
                .ok_or_else(|| ConfigError::invalid_env_var($var, "expected bool"))?;
        }
    };
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```ignore
/// use digs_runtime::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_project_root("/path/to/project")
///     .skip_env_vars()  // For testing
///     .load()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Global config file path (defaults to ~/.digs/config.toml).
    global_config_path: Option<PathBuf>,

    /// Project root directory.
    project_root: Option<PathBuf>,

    skip_env: bool,
    skip_global: bool,
    skip_project: bool,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom global config path.
    #[must_use]
    pub fn with_global_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Sets the project root directory.
    ///
    /// Project config will be loaded from `<project_root>/.digs/config.toml`.
    #[must_use]
    pub fn with_project_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_root = Some(path.into());
        self
    }

    /// Skips environment variable loading.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    #[must_use]
    pub fn skip_global_config(mut self) -> Self {
        self.skip_global = true;
        self
    }

    #[must_use]
    pub fn skip_project_config(mut self) -> Self {
        self.skip_project = true;
        self
    }

    /// Loads and merges configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any config file exists but cannot be
    /// parsed, or an environment variable has an invalid value. Missing
    /// config files are silently ignored.
    pub fn load(&self) -> Result<DigsConfig, ConfigError> {
        let mut config = self.load_files()?;
        if !self.skip_env {
            apply_env(&mut config, |name| std::env::var(name).ok())?;
        }
        Ok(config)
    }

    fn load_files(&self) -> Result<DigsConfig, ConfigError> {
        let mut config = DigsConfig::default();

        if !self.skip_global {
            let global_path = self
                .global_config_path
                .clone()
                .unwrap_or_else(default_config_path);

            if let Some(global_config) = load_file(&global_path)? {
                debug!(path = %global_path.display(), "loaded global config");
                config.merge(&global_config);
            }
        }

        if !self.skip_project {
            if let Some(project_root) = &self.project_root {
                let path = project_root
                    .join(PROJECT_CONFIG_DIR)
                    .join(PROJECT_CONFIG_FILE);

                if let Some(project_config) = load_file(&path)? {
                    debug!(
                        path = %path.display(),
                        project = %project_root.display(),
                        "loaded project config"
                    );
                    config.merge(&project_config);
                }
            }
        }

        Ok(config)
    }
}

/// Loads a config file, returning None if it doesn't exist.
fn load_file(path: &Path) -> Result<Option<DigsConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let config = DigsConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?;
    Ok(Some(config))
}

/// Applies `DIGS_*` overrides read through `lookup`.
fn apply_env(
    config: &mut DigsConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    parse_env_bool!(lookup, config.broker.embedded, "DIGS_BROKER_EMBEDDED");

    if let Some(val) = lookup("DIGS_NAMESPACE") {
        config.namespace = val;
    }
    if let Some(val) = lookup("DIGS_PROJECT") {
        config.project = val;
    }
    if let Some(val) = lookup("DIGS_BROKER_HOST") {
        config.broker.host = val;
    }
    if let Some(val) = lookup("DIGS_BROKER_PORT") {
        config.broker.port = val
            .parse()
            .map_err(|_| ConfigError::invalid_env_var("DIGS_BROKER_PORT", "expected port number"))?;
    }
    if let Some(val) = lookup("DIGS_WORKER_MODE") {
        config.worker.mode = val
            .parse::<WorkerMode>()
            .map_err(|e| ConfigError::invalid_env_var("DIGS_WORKER_MODE", e))?;
    }
    if let Some(val) = lookup("DIGS_LOG_LEVEL") {
        config.logging.level = val;
    }

    Ok(())
}

/// Parses a boolean from string.
///
/// Accepts: "true", "false", "1", "0", "yes", "no", "on", "off"
/// (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
