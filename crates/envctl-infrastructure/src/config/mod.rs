//! Configuration loader
//!
//! Reads the declarative [`EnvironmentConfig`] from YAML. Resolution order:
//!
//! 1. Explicit path (via [`ConfigLoader::with_config_path`])
//! 2. `$ENVCTL_CONFIG`
//! 3. `<user config dir>/envctl/config.yaml`
//!
//! Parsing is strict (unknown fields are rejected by the domain types) and a
//! structural validation pass runs after parse.

use std::path::{Path, PathBuf};

use envctl_domain::config::EnvironmentConfig;
use envctl_domain::error::{Error, Result};
use envctl_domain::ports::ConfigSource;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "ENVCTL_CONFIG";

/// Configuration loader service
#[derive(Clone, Default)]
pub struct ConfigLoader {
    /// Optional explicit config file path (overrides environment resolution)
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader with default settings
    #[must_use]
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set an explicit configuration file path (overrides env-based resolution)
    #[must_use]
    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load and validate the environment configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when no config file can be found, the YAML
    /// does not parse (including unknown fields), or validation fails.
    pub fn load(&self) -> Result<EnvironmentConfig> {
        let path = self.find_config_path()?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: EnvironmentConfig = serde_yaml::from_str(&content).map_err(|e| {
            Error::config(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// The path `load` would read, after resolution.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when no location can be resolved.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        self.find_config_path()
    }

    fn find_config_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config_path {
            return Ok(path.clone());
        }
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("envctl").join("config.yaml"))
            .ok_or_else(|| {
                Error::config("cannot resolve a config location (no user config directory)")
            })
    }
}

impl ConfigSource for ConfigLoader {
    fn load(&self) -> Result<EnvironmentConfig> {
        Self::load(self)
    }
}
