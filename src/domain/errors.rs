//! Domain errors for the covergen iteration loop.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::models::coverage::CoverageFormat;
use super::models::recording::{GroupHash, PromptFingerprint};

/// Where in a coverage report a decoder gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPosition {
    /// 1-based line number (text and CSV formats).
    Line(usize),
    /// Byte offset into the report (XML and JSON formats).
    Byte(u64),
}

impl fmt::Display for ReportPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(line) => write!(f, "line {line}"),
            Self::Byte(offset) => write!(f, "byte {offset}"),
        }
    }
}

/// Errors raised by the Generator collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeneratorError {
    /// Worth retrying (rate limiting, overloaded backend, transport hiccup).
    #[error("transient generator error: {0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("fatal generator error: {0}")]
    Fatal(String),
}

impl GeneratorError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Partial output captured from a process that was killed on timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialOutput {
    /// Bytes read from stdout before the kill, lossily decoded.
    pub stdout: String,
    /// Bytes read from stderr before the kill, lossily decoded.
    pub stderr: String,
}

/// Errors that can occur while driving a coverage session.
#[derive(Debug, Error)]
pub enum CoverError {
    #[error("malformed {format} report at {position}: {message}")]
    MalformedReport {
        format: CoverageFormat,
        position: ReportPosition,
        message: String,
    },

    #[error("unsupported coverage format: {0}")]
    UnsupportedFormat(String),

    #[error("coverage report not found: {}", path.display())]
    ReportMissing { path: PathBuf },

    #[error("coverage report is older than the test run that should have produced it: {}", path.display())]
    StaleReport { path: PathBuf },

    #[error("failed to spawn `{command}`: {message}")]
    SpawnFailed { command: String, message: String },

    #[error("command timed out after {}s", timeout.as_secs_f64())]
    TimedOut {
        timeout: Duration,
        partial: PartialOutput,
    },

    #[error("malformed candidate: {0}")]
    MalformedCandidate(String),

    #[error("duplicate candidate: an identical test was already accepted in this session")]
    Duplicate,

    #[error("no recording for prompt {} in group {}", fingerprint.short(), group.short())]
    NoRecording {
        group: GroupHash,
        fingerprint: PromptFingerprint,
    },

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error("baseline test run failed with exit code {exit_code:?}:\n{output}")]
    BaselineFailed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type CoverResult<T> = Result<T, CoverError>;

impl CoverError {
    /// Build an [`CoverError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the session immediately.
    ///
    /// Report, candidate and test-execution problems are folded into the
    /// next prompt instead.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::SpawnFailed { .. }
            | Self::NoRecording { .. }
            | Self::BaselineFailed { .. }
            | Self::Io { .. }
            | Self::Storage(_)
            | Self::Config(_)
            | Self::UnsupportedFormat(_) => true,
            // Transient errors only reach the session after retries ran out.
            Self::Generator(_) => true,
            Self::MalformedReport { .. }
            | Self::ReportMissing { .. }
            | Self::StaleReport { .. }
            | Self::TimedOut { .. }
            | Self::MalformedCandidate(_)
            | Self::Duplicate => false,
        }
    }
}

impl From<sqlx::Error> for CoverError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_yaml::Error> for CoverError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
