//! Configuration loader

use std::path::Path;

use sessiond_utils::{config_file, Result, SessiondError};

use super::AppConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| SessiondError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| SessiondError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.timeouts.save_timeout_ms < 1000 {
            return Err(SessiondError::config(
                "save_timeout_ms must be at least 1000",
            ));
        }

        if config.timeouts.startup_timeout_ms < 1000 {
            return Err(SessiondError::config(
                "startup_timeout_ms must be at least 1000",
            ));
        }

        if config.timeouts.die_timeout_ms < 100 {
            return Err(SessiondError::config("die_timeout_ms must be at least 100"));
        }

        if config.general.session_name.is_empty() {
            return Err(SessiondError::config("session_name must not be empty"));
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<AppConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }
}
