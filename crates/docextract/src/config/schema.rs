use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::extractor::selector::DEFAULT_QUALITY_THRESHOLD;
use crate::retry::{RetryPolicy, DEFAULT_BACKOFF_BASE_SECS, DEFAULT_MAX_RETRIES};

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    /// SQLite file; `~/.docextract/data/docextract.db` when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A claim older than this is considered abandoned and is redelivered.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_visibility_timeout_secs() -> u64 {
    900
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_path: None,
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            extraction: ExtractionConfig::default(),
            retry: RetryConfig::default(),
            submission: SubmissionConfig::default(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_retries, self.retry.backoff_base_secs)
    }

    /// The configured database path, falling back to the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Primary output with more trimmed characters than this skips the
    /// secondary extractor.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: usize,
}

fn default_quality_threshold() -> usize {
    DEFAULT_QUALITY_THRESHOLD
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_base_secs() -> u64 {
    DEFAULT_BACKOFF_BASE_SECS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Reuse a live delivery instead of starting a second chain for the same document.
    #[serde(default = "default_true")]
    pub deduplicate: bool,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    50
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            deduplicate: true,
            max_batch_size: default_max_batch_size(),
        }
    }
}
