use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Recording directory cannot be empty")]
    EmptyRecordingDir,

    #[error("Invalid stall_threshold: {0}. Must be at least 1 when set")]
    InvalidStallThreshold(u32),

    #[error("Invalid test_timeout_secs: {0}. Must be at least 1 when set")]
    InvalidTestTimeout(u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Environment variable prefix for overrides, e.g. `COVERGEN_RETRY__MAX_RETRIES`.
pub const ENV_PREFIX: &str = "COVERGEN_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging from the working directory
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .covergen/config.yaml (project config)
    /// 3. .covergen/local.yaml (local overrides, optional)
    /// 4. Environment variables (COVERGEN_* prefix)
    ///
    /// CLI flags are applied on top by the caller.
    pub fn load() -> Result<Config> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`ConfigLoader::load`], rooted at `project_root`.
    pub fn load_from(project_root: &Path) -> Result<Config> {
        let dir = project_root.join(".covergen");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.recording.dir.trim().is_empty() {
            return Err(ConfigError::EmptyRecordingDir);
        }

        if let Some(threshold @ 0) = config.policy.stall_threshold {
            return Err(ConfigError::InvalidStallThreshold(threshold));
        }

        if let Some(secs @ 0) = config.policy.test_timeout_secs {
            return Err(ConfigError::InvalidTestTimeout(secs));
        }

        if config.generator.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "generator.model cannot be empty".to_string(),
            ));
        }
        if config.generator.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "generator.max_tokens must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
