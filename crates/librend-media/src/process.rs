//! Owned handles for external processes.

use std::process::ExitStatus;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// An external process owned by exactly one render.
///
/// The child is spawned with `kill_on_drop`, so a handle that goes out of
/// scope on a failure path still takes its process down with it.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: u32,
    child: Child,
}

impl ProcessHandle {
    /// Spawn `command`, naming the process for logs and errors.
    pub fn spawn(name: impl Into<String>, mut command: Command) -> MediaResult<Self> {
        let name = name.into();
        command.kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| MediaError::spawn_failed(name.clone(), e))?;
        let pid = child
            .id()
            .ok_or_else(|| MediaError::process_failed(name.clone(), "exited before start", None))?;

        debug!(process = %name, pid, "Spawned process");
        Ok(Self { name, pid, child })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status if the process has already exited.
    pub fn try_wait(&mut self) -> MediaResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Deliver `signal` unless the process has already exited.
    ///
    /// Returns `false` when there was nothing left to signal.
    pub fn signal(&mut self, signal: Signal) -> MediaResult<bool> {
        if self.try_wait()?.is_some() {
            return Ok(false);
        }

        let pid = i32::try_from(self.pid).map_err(|_| MediaError::SignalFailed {
            name: self.name.clone(),
            message: format!("pid {} out of range", self.pid),
        })?;

        match kill(Pid::from_raw(pid), signal) {
            Ok(()) => {
                debug!(process = %self.name, pid = self.pid, ?signal, "Signalled process");
                Ok(true)
            }
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(MediaError::SignalFailed {
                name: self.name.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> MediaResult<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Wait at most `timeout`; `None` means the process is still running.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> MediaResult<Option<ExitStatus>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(Some(status?)),
            Err(_) => Ok(None),
        }
    }

    /// Kill the process and reap it.
    pub async fn kill(&mut self) -> MediaResult<()> {
        if self.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        Ok(())
    }

    /// Ask the process to exit with `signal`, killing it after `grace`.
    ///
    /// Exceeding the grace period is reported as a timeout even though the
    /// process has been killed and reaped by then.
    pub async fn terminate(mut self, signal: Signal, grace: Duration) -> MediaResult<ExitStatus> {
        self.signal(signal)?;

        match self.wait_timeout(grace).await? {
            Some(status) => {
                debug!(process = %self.name, pid = self.pid, %status, "Process exited");
                Ok(status)
            }
            None => {
                warn!(
                    process = %self.name,
                    pid = self.pid,
                    "Process ignored {:?} for {:?}, killing", signal, grace
                );
                self.kill().await?;
                Err(MediaError::Timeout(grace.as_secs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleep_command(secs: &str) -> Command {
        let mut cmd = Command::new("sleep");
        cmd.arg(secs);
        cmd
    }

    #[tokio::test]
    async fn test_wait_reports_exit() {
        let mut handle = ProcessHandle::spawn("true", Command::new("true")).unwrap();
        let status = handle.wait().await.unwrap();
        assert!(status.success());
        assert!(handle.pid() > 0);
    }

    #[tokio::test]
    async fn test_terminate_running_process() {
        let handle = ProcessHandle::spawn("sleeper", sleep_command("30")).unwrap();
        let status = handle
            .terminate(Signal::SIGTERM, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_signal_after_exit_is_noop() {
        let mut handle = ProcessHandle::spawn("true", Command::new("true")).unwrap();
        handle.wait().await.unwrap();
        assert!(!handle.signal(Signal::SIGTERM).unwrap());
    }

    #[tokio::test]
    async fn test_wait_timeout_on_running_process() {
        let mut handle = ProcessHandle::spawn("sleeper", sleep_command("30")).unwrap();
        let status = handle.wait_timeout(Duration::from_millis(50)).await.unwrap();
        assert!(status.is_none());
        handle.kill().await.unwrap();
    }

    #[test]
    fn test_spawn_missing_binary() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let err = ProcessHandle::spawn("missing", Command::new("/nonexistent/librend-bin"))
            .unwrap_err();
        assert!(matches!(err, MediaError::SpawnFailed { .. }));
    }
}
