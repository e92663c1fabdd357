//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use librend_media::{CaptureConfig, DisplayConfig, SynthesisConfig};

use crate::error::{WorkerError, WorkerResult};
use crate::protocol::ProtocolConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Where finished videos are written
    pub storage_dir: PathBuf,
    /// Where the synthesis process leaves per-request artifacts
    pub screens_dir: PathBuf,
    pub synthesis: SynthesisConfig,
    pub display: DisplayConfig,
    pub capture: CaptureConfig,
    pub protocol: ProtocolConfig,
    /// Upper bound on a single synthesis run; `None` waits forever
    pub synthesis_timeout: Option<Duration>,
    /// Broker keep-alive period
    pub keepalive_interval: Duration,
    /// Pause after requeueing a rejected delivery
    pub requeue_backoff: Duration,
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("/storage/libras"),
            screens_dir: PathBuf::from("/tmp/vlibras/screens"),
            synthesis: SynthesisConfig::default(),
            display: DisplayConfig::default(),
            capture: CaptureConfig::default(),
            protocol: ProtocolConfig::default(),
            synthesis_timeout: None,
            keepalive_interval: Duration::from_secs(30),
            requeue_backoff: Duration::from_millis(100),
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let synthesis = SynthesisConfig {
            executable: std::env::var("VLIBRAS_VIDEO_CREATOR")
                .map(PathBuf::from)
                .unwrap_or(defaults.synthesis.executable),
            ..defaults.synthesis
        };

        let display = DisplayConfig {
            server_bin: std::env::var("XVFB_BIN").unwrap_or(defaults.display.server_bin),
            base_number: env_parse("DISPLAY_BASE").unwrap_or(defaults.display.base_number),
            ..defaults.display
        };

        let mut capture = CaptureConfig {
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or(defaults.capture.ffmpeg_bin),
            stop_timeout: env_parse("CAPTURE_STOP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.capture.stop_timeout),
            ..defaults.capture
        };
        if let Ok(pixel_format) = std::env::var("CAPTURE_PIXEL_FORMAT") {
            capture.profile.pixel_format = pixel_format;
        }

        let protocol = ProtocolConfig {
            addr: std::env::var("SYNTHESIS_ADDR").unwrap_or(defaults.protocol.addr),
            item_interval: env_parse("SYNTHESIS_ITEM_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.protocol.item_interval),
            connect_retry: env_parse("SYNTHESIS_CONNECT_RETRY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.protocol.connect_retry),
            connect_attempts: env_parse("SYNTHESIS_CONNECT_ATTEMPTS"),
        };

        Self {
            storage_dir: std::env::var("VLIBRAS_VIDEO_LIBRAS")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            screens_dir: std::env::var("VLIBRAS_VIDEO_SCREENS")
                .map(PathBuf::from)
                .unwrap_or(defaults.screens_dir),
            synthesis,
            display,
            capture,
            protocol,
            synthesis_timeout: env_parse("SYNTHESIS_TIMEOUT_SECS").map(Duration::from_secs),
            keepalive_interval: env_parse("KEEPALIVE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.keepalive_interval),
            requeue_backoff: env_parse("REQUEUE_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.requeue_backoff),
            metrics_port: env_parse("METRICS_PORT"),
        }
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.keepalive_interval.is_zero() {
            return Err(WorkerError::config_error("KEEPALIVE_INTERVAL_SECS must be positive"));
        }
        if self.protocol.connect_attempts == Some(0) {
            return Err(WorkerError::config_error(
                "SYNTHESIS_CONNECT_ATTEMPTS must be positive when set",
            ));
        }
        if self.synthesis_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(WorkerError::config_error("SYNTHESIS_TIMEOUT_SECS must be positive when set"));
        }
        if self.storage_dir == self.screens_dir {
            return Err(WorkerError::config_error(format!(
                "storage and working directories must differ: {}",
                self.storage_dir.display()
            )));
        }
        Ok(())
    }
}
