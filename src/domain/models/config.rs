use serde::{Deserialize, Serialize};

use super::coverage::CoverageScope;

/// Main configuration structure for covergen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Language-model backend configuration
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Retry policy for transient Generator errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Session policy knobs
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Recording store configuration
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Run artifact configuration
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Generator backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GeneratorConfig {
    /// Model identifier sent with each request
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the messages API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key; falls back to `ANTHROPIC_API_KEY` when unset
    #[serde(default)]
    pub api_key: Option<String>,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

const fn default_max_tokens() -> u32 {
    4096
}

const fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            api_key: None,
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Session policy configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PolicyConfig {
    /// Consecutive no-gain iterations before stopping as Stalled (disabled when unset)
    #[serde(default)]
    pub stall_threshold: Option<u32>,

    /// Cap on a single test-command run in seconds (session budget only when unset)
    #[serde(default)]
    pub test_timeout_secs: Option<u64>,

    /// Which part of the report counts toward the target
    #[serde(default)]
    pub coverage_scope: CoverageScope,
}

/// Recording store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecordingConfig {
    /// Directory holding recording files
    #[serde(default = "default_recording_dir")]
    pub dir: String,

    /// Scenario name used in recording file names
    #[serde(default)]
    pub scenario: Option<String>,
}

fn default_recording_dir() -> String {
    ".covergen/recordings".to_string()
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            dir: default_recording_dir(),
            scenario: None,
        }
    }
}

/// Run artifact configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ArtifactsConfig {
    /// Directory for the run log
    #[serde(default = "default_artifacts_dir")]
    pub dir: String,

    /// Path to the `SQLite` results store
    #[serde(default = "default_results_db")]
    pub results_db: String,

    /// Path to the human-readable report
    #[serde(default = "default_report_file")]
    pub report_file: String,
}

fn default_artifacts_dir() -> String {
    ".covergen/runs".to_string()
}

fn default_results_db() -> String {
    ".covergen/runs/results.db".to_string()
}

fn default_report_file() -> String {
    ".covergen/runs/report.txt".to_string()
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
            results_db: default_results_db(),
            report_file: default_report_file(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Console format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
