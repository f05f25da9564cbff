use std::path::{Path, PathBuf};

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

/// Returns the per-user config location: `~/.docextract/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".docextract").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "poll_interval_ms must be at least 1".to_string(),
        });
    }

    if config.visibility_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "visibility_timeout_secs must be at least 1".to_string(),
        });
    }

    if config.visibility_timeout_secs > i32::MAX as u64 {
        return Err(ConfigError::Validation {
            message: "visibility_timeout_secs is too large".to_string(),
        });
    }

    if config.retry.backoff_base_secs == 0 && config.retry.max_retries > 0 {
        return Err(ConfigError::Validation {
            message: "retry.backoff_base_secs must be positive when retries are enabled"
                .to_string(),
        });
    }

    // Longest backoff must fit comfortably in a signed timestamp offset.
    let longest = config
        .retry
        .backoff_base_secs
        .checked_mul(u64::from(config.retry.max_retries))
        .filter(|secs| *secs <= i32::MAX as u64);
    if longest.is_none() {
        return Err(ConfigError::Validation {
            message: "retry.backoff_base_secs * retry.max_retries is too large".to_string(),
        });
    }

    if config.submission.max_batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "submission.max_batch_size must be at least 1".to_string(),
        });
    }

    Ok(())
}
