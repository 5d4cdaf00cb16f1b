//! Process Runner.
//!
//! Runs the project's test command through `sh -c` in its own process group
//! so that the whole tree can be killed when the time budget expires. A
//! [`ProcessGroupGuard`] also kills the group if the awaiting future is
//! dropped, which is how outer cancellation reaches the child.

mod guard;

use std::process::Stdio;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use guard::ProcessGroupGuard;

use crate::domain::errors::{CoverError, CoverResult, PartialOutput};
use crate::domain::ports::{CommandOutput, CommandRunner, CommandSpec};

/// Upper bound on captured bytes per stream.
const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// How long to wait for the pipes to drain once the process is gone.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

/// [`CommandRunner`] backed by a POSIX shell.
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    shell: String,
    max_output_bytes: usize,
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different shell binary (it must accept `-c <command>`).
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn build(&self, spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

async fn read_bounded<R>(mut reader: R, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(captured.len());
        captured.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok(captured)
}

async fn collect(task: Option<JoinHandle<std::io::Result<Vec<u8>>>>, stream: &str) -> String {
    let Some(task) = task else {
        return String::new();
    };
    match tokio::time::timeout(IO_CAPTURE_TIMEOUT, task).await {
        Ok(Ok(Ok(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Ok(Err(err))) => {
            warn!(stream, error = %err, "output capture failed");
            String::new()
        }
        Ok(Err(err)) => {
            warn!(stream, error = %err, "output capture task panicked");
            String::new()
        }
        Err(_) => {
            warn!(stream, "output capture timed out");
            String::new()
        }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> CoverResult<CommandOutput> {
        debug!(
            command = %spec.command,
            cwd = %spec.cwd.display(),
            timeout_secs = spec.timeout.as_secs_f64(),
            "spawning test command"
        );

        let started_at = SystemTime::now();
        let started = Instant::now();
        let mut child = self.build(spec).spawn().map_err(|e| CoverError::SpawnFailed {
            command: spec.command.clone(),
            message: format!("{e} (cwd: {})", spec.cwd.display()),
        })?;
        let mut guard = ProcessGroupGuard::new(child.id());

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_bounded(out, self.max_output_bytes)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_bounded(err, self.max_output_bytes)));

        let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                return Err(CoverError::SpawnFailed {
                    command: spec.command.clone(),
                    message: format!("failed to wait for process: {e}"),
                });
            }
            Err(_) => None,
        };

        // Reap anything the command left running in its group, then drain pipes.
        guard.kill();
        if status.is_none() {
            let _ = child.wait().await;
        }
        let stdout = collect(stdout_task, "stdout").await;
        let stderr = collect(stderr_task, "stderr").await;
        let elapsed = started.elapsed();

        match status {
            Some(status) => {
                debug!(
                    exit_code = ?status.code(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "test command finished"
                );
                Ok(CommandOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    elapsed,
                    started_at,
                })
            }
            None => {
                warn!(
                    command = %spec.command,
                    timeout_secs = spec.timeout.as_secs_f64(),
                    "test command timed out; process group killed"
                );
                Err(CoverError::TimedOut {
                    timeout: spec.timeout,
                    partial: PartialOutput { stdout, stderr },
                })
            }
        }
    }
}
