//! Command runner port - executes the project's test command.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::domain::errors::CoverResult;

/// What to run and under which limits.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Shell command line.
    pub command: String,
    pub cwd: PathBuf,
    /// Added on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Wall-clock limit; the process tree is killed when it expires.
    pub timeout: Duration,
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    /// When the process was spawned; reports older than this are stale.
    pub started_at: SystemTime,
}

impl CommandOutput {
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Trait for process runners.
///
/// Fails with `TimedOut` (partial output attached) when the limit expires and
/// `SpawnFailed` when the command cannot be started at all.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> CoverResult<CommandOutput>;
}
