//! Screen capture of a virtual display with FFmpeg.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::process::Command;
use tracing::{debug, info};

use crate::display::DisplayTarget;
use crate::error::{MediaError, MediaResult};
use crate::process::ProcessHandle;

/// Fixed capture profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureProfile {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub video_codec: String,
    pub pixel_format: String,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            framerate: 30,
            video_codec: "libx264".to_string(),
            pixel_format: "yuv444p".to_string(),
        }
    }
}

/// Capture encoder configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// FFmpeg binary
    pub ffmpeg_bin: String,
    pub profile: CaptureProfile,
    /// How long the encoder gets to finalize the file after being signalled
    pub stop_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            profile: CaptureProfile::default(),
            stop_timeout: Duration::from_secs(60),
        }
    }
}

/// Builder for the x11grab command line.
#[derive(Debug, Clone)]
pub struct CaptureCommand {
    /// x11grab input, e.g. `:99.0`
    input: String,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl CaptureCommand {
    /// Create a new capture command for a display.
    pub fn new(display: &DisplayTarget, output: impl AsRef<Path>) -> Self {
        Self {
            input: display.grab_input(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "quiet".to_string(),
        }
    }

    /// Command for the given profile.
    pub fn with_profile(display: &DisplayTarget, output: impl AsRef<Path>, profile: &CaptureProfile) -> Self {
        Self::new(display, output)
            .video_size(profile.width, profile.height)
            .framerate(profile.framerate)
            .input_format("x11grab")
            .input_arg("-draw_mouse")
            .input_arg("0")
            .video_codec(&profile.video_codec)
            .pixel_format(&profile.pixel_format)
            .no_audio()
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn video_size(self, width: u32, height: u32) -> Self {
        self.input_arg("-video_size").input_arg(format!("{}x{}", width, height))
    }

    pub fn framerate(self, fps: u32) -> Self {
        self.input_arg("-r").input_arg(fps.to_string())
    }

    pub fn input_format(self, format: impl Into<String>) -> Self {
        self.input_arg("-f").input_arg(format)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-vcodec").output_arg(codec)
    }

    pub fn pixel_format(self, format: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(format)
    }

    /// Drop the audio track.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-loglevel".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.clone());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// A running capture encoder.
///
/// Only `start` produces a recorder and `stop` consumes it, so a stop can
/// never precede a successful start.
#[derive(Debug)]
pub struct CaptureRecorder {
    process: ProcessHandle,
    output: PathBuf,
    stop_timeout: Duration,
}

impl CaptureRecorder {
    /// Start recording `display` into `output`.
    pub fn start(config: &CaptureConfig, display: &DisplayTarget, output: impl AsRef<Path>) -> MediaResult<Self> {
        which::which(&config.ffmpeg_bin)
            .map_err(|_| MediaError::BinaryNotFound(config.ffmpeg_bin.clone()))?;

        let output = output.as_ref().to_path_buf();
        let args = CaptureCommand::with_profile(display, &output, &config.profile).build_args();
        debug!("Running capture: {} {}", config.ffmpeg_bin, args.join(" "));

        let mut cmd = Command::new(&config.ffmpeg_bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let process = ProcessHandle::spawn("capture", cmd)?;
        let target = *display;
        info!(
            display = %target,
            pid = process.pid(),
            output = %output.display(),
            "Capture started"
        );

        Ok(Self {
            process,
            output,
            stop_timeout: config.stop_timeout,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Signal the encoder to finish and wait until it has exited.
    ///
    /// FFmpeg writes the container trailer on SIGQUIT, so the file is
    /// complete once this returns. An encoder that died before being asked
    /// to stop is an error: its output cannot be trusted.
    pub async fn stop(mut self) -> MediaResult<PathBuf> {
        if let Some(status) = self.process.try_wait()? {
            return Err(MediaError::process_failed(
                "capture",
                format!("exited before stop: {}", status),
                status.code(),
            ));
        }

        let pid = self.process.pid();
        let status = self
            .process
            .terminate(Signal::SIGQUIT, self.stop_timeout)
            .await?;

        info!(pid, %status, output = %self.output.display(), "Capture stopped");
        Ok(self.output)
    }
}
