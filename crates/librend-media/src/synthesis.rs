//! Launching the sign-language synthesis process.
//!
//! The synthesis process renders avatar animation into a virtual display
//! while it receives gloss items over its local socket. It exits on its
//! own once the terminal item has been played.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use librend_models::CorrelationId;

use crate::display::DisplayTarget;
use crate::error::{MediaError, MediaResult};
use crate::process::ProcessHandle;

/// Fixed quality and resolution flags passed after the screen index.
pub const DEFAULT_QUALITY_ARGS: &[&str] = &[
    "30",
    "20",
    "25",
    "-screen-fullscreen",
    "1",
    "-screen-quality",
    "Fantastic",
    "-force-opengl",
];

/// Synthesis process configuration.
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Synthesis executable
    pub executable: PathBuf,
    /// Flags following the correlation id and screen index
    pub quality_args: Vec<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/opt/vlibras/videoCreator"),
            quality_args: DEFAULT_QUALITY_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Command line for one synthesis run.
#[derive(Debug, Clone)]
pub struct SynthesisCommand {
    executable: PathBuf,
    args: Vec<String>,
    display: DisplayTarget,
}

impl SynthesisCommand {
    pub fn new(config: &SynthesisConfig, correlation_id: &CorrelationId, display: DisplayTarget) -> Self {
        let mut args = vec![correlation_id.to_string(), display.screen.to_string()];
        args.extend(config.quality_args.iter().cloned());

        Self {
            executable: config.executable.clone(),
            args,
            display,
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Spawn the process bound to the display.
    pub fn spawn(&self) -> MediaResult<ProcessHandle> {
        which::which(&self.executable)
            .map_err(|_| MediaError::BinaryNotFound(self.executable.display().to_string()))?;

        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .env("DISPLAY", self.display.display_env())
            .stdin(Stdio::null());

        let process = ProcessHandle::spawn("synthesis", cmd)?;
        info!(
            display = %self.display,
            pid = process.pid(),
            "Started synthesis process"
        );
        Ok(process)
    }
}
