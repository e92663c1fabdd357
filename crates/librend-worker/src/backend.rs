//! Render backend built on real external processes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use librend_media::{
    CaptureConfig, CaptureRecorder, DisplayConfig, ProcessHandle, SynthesisCommand,
    SynthesisConfig, VirtualDisplay,
};
use librend_models::CorrelationId;

use crate::controller::RenderBackend;
use crate::error::WorkerResult;

/// Xvfb, the synthesis executable and FFmpeg.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    display: DisplayConfig,
    synthesis: SynthesisConfig,
    capture: CaptureConfig,
}

impl ProcessBackend {
    pub fn new(display: DisplayConfig, synthesis: SynthesisConfig, capture: CaptureConfig) -> Self {
        Self {
            display,
            synthesis,
            capture,
        }
    }
}

#[async_trait]
impl RenderBackend for ProcessBackend {
    type Display = VirtualDisplay;
    type Synthesis = ProcessHandle;
    type Capture = CaptureRecorder;

    async fn acquire_display(&self) -> WorkerResult<VirtualDisplay> {
        Ok(VirtualDisplay::start(&self.display).await?)
    }

    async fn launch_synthesis(
        &self,
        correlation_id: &CorrelationId,
        display: &VirtualDisplay,
    ) -> WorkerResult<ProcessHandle> {
        let command = SynthesisCommand::new(&self.synthesis, correlation_id, display.target());
        Ok(command.spawn()?)
    }

    async fn wait_synthesis(&self, synthesis: &mut ProcessHandle) -> WorkerResult<()> {
        let status = synthesis.wait().await?;
        if !status.success() {
            warn!(pid = synthesis.pid(), %status, "Synthesis process exited with failure");
        }
        Ok(())
    }

    async fn abort_synthesis(&self, mut synthesis: ProcessHandle) -> WorkerResult<()> {
        Ok(synthesis.kill().await?)
    }

    async fn start_capture(&self, display: &VirtualDisplay, output: &Path) -> WorkerResult<CaptureRecorder> {
        Ok(CaptureRecorder::start(&self.capture, &display.target(), output)?)
    }

    async fn stop_capture(&self, capture: CaptureRecorder) -> WorkerResult<PathBuf> {
        Ok(capture.stop().await?)
    }

    async fn release_display(&self, display: VirtualDisplay) -> WorkerResult<()> {
        Ok(display.release().await?)
    }
}
