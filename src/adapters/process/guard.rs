use tracing::debug;

/// Kills a child's process group when dropped or when [`kill`](Self::kill)
/// is called, whichever comes first.
#[derive(Debug)]
pub struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    /// `pid` is the id of a child spawned as the leader of its own group.
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    /// Send SIGKILL to the whole group. Idempotent.
    pub fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "killed process group"),
        // Every member already exited.
        Err(Errno::ESRCH) => {}
        Err(err) => debug!(pgid, error = %err, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(pgid: i32) {
    // `kill_on_drop` on the child handle covers the leader on other platforms.
    debug!(pgid, "process groups unsupported on this platform");
}
