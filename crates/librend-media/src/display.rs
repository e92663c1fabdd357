//! Virtual X displays backed by Xvfb.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::process::ProcessHandle;

/// Virtual display configuration.
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// X server binary
    pub server_bin: String,
    /// First display number probed for availability
    pub base_number: u32,
    /// How many display numbers to probe
    pub probe_count: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    /// How long to wait for the server socket to appear
    pub ready_timeout: Duration,
    /// How long the server gets to exit after SIGTERM
    pub stop_timeout: Duration,
    /// Directory holding X server sockets
    pub socket_dir: PathBuf,
    /// Directory holding X server lock files
    pub lock_dir: PathBuf,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            server_bin: "Xvfb".to_string(),
            base_number: 99,
            probe_count: 100,
            width: 800,
            height: 600,
            depth: 24,
            ready_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            socket_dir: PathBuf::from("/tmp/.X11-unix"),
            lock_dir: PathBuf::from("/tmp"),
        }
    }
}

impl DisplayConfig {
    fn socket_path(&self, number: u32) -> PathBuf {
        self.socket_dir.join(format!("X{}", number))
    }

    fn lock_path(&self, number: u32) -> PathBuf {
        self.lock_dir.join(format!(".X{}-lock", number))
    }

    /// First display number with neither a lock file nor a socket.
    pub fn find_free_number(&self) -> MediaResult<u32> {
        (self.base_number..self.base_number.saturating_add(self.probe_count))
            .find(|n| !self.lock_path(*n).exists() && !self.socket_path(*n).exists())
            .ok_or_else(|| {
                MediaError::DisplayUnavailable(format!(
                    ":{}..:{}",
                    self.base_number,
                    self.base_number.saturating_add(self.probe_count)
                ))
            })
    }
}

/// Where a client process should draw or read frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayTarget {
    pub number: u32,
    pub screen: u32,
}

impl DisplayTarget {
    pub fn new(number: u32) -> Self {
        Self { number, screen: 0 }
    }

    /// Value for the `DISPLAY` environment variable, e.g. `:99`.
    pub fn display_env(&self) -> String {
        format!(":{}", self.number)
    }

    /// x11grab input, e.g. `:99.0`.
    pub fn grab_input(&self) -> String {
        format!(":{}.{}", self.number, self.screen)
    }
}

impl fmt::Display for DisplayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}.{}", self.number, self.screen)
    }
}

/// A running off-screen X server.
#[derive(Debug)]
pub struct VirtualDisplay {
    target: DisplayTarget,
    process: ProcessHandle,
    stop_timeout: Duration,
}

impl VirtualDisplay {
    /// Start a server on the first free display and wait until it accepts clients.
    pub async fn start(config: &DisplayConfig) -> MediaResult<Self> {
        which::which(&config.server_bin)
            .map_err(|_| MediaError::BinaryNotFound(config.server_bin.clone()))?;

        let number = config.find_free_number()?;
        let target = DisplayTarget::new(number);

        let mut cmd = Command::new(&config.server_bin);
        cmd.arg(target.display_env())
            .arg("-screen")
            .arg(target.screen.to_string())
            .arg(format!("{}x{}x{}", config.width, config.height, config.depth))
            .arg("-nolisten")
            .arg("tcp")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let process = ProcessHandle::spawn("xvfb", cmd)?;
        let mut display = Self {
            target,
            process,
            stop_timeout: config.stop_timeout,
        };
        display.wait_ready(config).await?;

        let pid = display.process.pid();
        info!(display = %target, pid, "Virtual display ready");
        Ok(display)
    }

    async fn wait_ready(&mut self, config: &DisplayConfig) -> MediaResult<()> {
        let socket = config.socket_path(self.target.number);
        let started = Instant::now();

        loop {
            if socket.exists() {
                return Ok(());
            }
            if let Some(status) = self.process.try_wait()? {
                return Err(MediaError::process_failed(
                    "xvfb",
                    format!("exited before display {} was ready: {}", self.target, status),
                    status.code(),
                ));
            }
            if started.elapsed() >= config.ready_timeout {
                return Err(MediaError::DisplayNotReady {
                    display: self.target.number,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn target(&self) -> DisplayTarget {
        self.target
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Stop the server and wait for it to exit.
    pub async fn release(self) -> MediaResult<()> {
        let target = self.target;
        self.process
            .terminate(Signal::SIGTERM, self.stop_timeout)
            .await?;
        debug!(display = %target, "Virtual display released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> DisplayConfig {
        DisplayConfig {
            base_number: 10,
            probe_count: 3,
            ready_timeout: Duration::from_secs(5),
            socket_dir: dir.path().to_path_buf(),
            lock_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_find_free_number_skips_taken_displays() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        std::fs::write(dir.path().join(".X10-lock"), b"").unwrap();
        std::fs::write(dir.path().join("X11"), b"").unwrap();

        assert_eq!(config.find_free_number().unwrap(), 12);

        std::fs::write(dir.path().join(".X12-lock"), b"").unwrap();
        assert!(matches!(
            config.find_free_number(),
            Err(MediaError::DisplayUnavailable(_))
        ));
    }

    #[test]
    fn test_display_target_formats() {
        let target = DisplayTarget::new(99);
        assert_eq!(target.display_env(), ":99");
        assert_eq!(target.grab_input(), ":99.0");
    }

    #[tokio::test]
    async fn test_start_and_release_with_fake_server() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("fake-xvfb");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\ntouch \"{}/X${{1#:}}\"\nexec sleep 30\n",
                dir.path().display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = DisplayConfig {
            server_bin: script.to_string_lossy().to_string(),
            ..config_in(&dir)
        };

        let display = VirtualDisplay::start(&config).await.unwrap();
        assert_eq!(display.target().number, 10);
        display.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_exiting_early_fails_start() {
        let dir = TempDir::new().unwrap();
        let config = DisplayConfig {
            server_bin: "false".to_string(),
            ..config_in(&dir)
        };

        let err = VirtualDisplay::start(&config).await.err().unwrap();
        assert!(matches!(err, MediaError::ProcessFailed { .. }));
    }
}
