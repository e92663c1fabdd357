//! Per-render structured logging.
//!
//! Every line a render emits carries its correlation id and the size of
//! the segment run, so one request can be followed across the display,
//! synthesis and capture steps.

use tracing::{error, info, warn, Span};

use librend_models::{CorrelationId, FinalizedRecord};

use crate::error::WorkerError;
use crate::session::CompletedSession;

/// Logger bound to one completed session.
#[derive(Debug, Clone)]
pub struct RenderLogger {
    correlation_id: CorrelationId,
    segments: usize,
}

impl RenderLogger {
    pub fn for_session(session: &CompletedSession) -> Self {
        Self {
            correlation_id: session.correlation_id.clone(),
            segments: session.segments.len(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Span wrapping the whole render.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "render",
            correlation_id = %self.correlation_id,
            segments = self.segments
        )
    }

    pub fn started(&self) {
        info!(
            correlation_id = %self.correlation_id,
            segments = self.segments,
            "Render started"
        );
    }

    /// A render step has completed.
    pub fn step(&self, step: &str) {
        info!(correlation_id = %self.correlation_id, step, "Render step done");
    }

    /// A best-effort cleanup step went wrong; the render outcome stands.
    pub fn cleanup_failed(&self, step: &str, err: &WorkerError) {
        warn!(
            correlation_id = %self.correlation_id,
            step,
            "Render cleanup failed: {}", err
        );
    }

    pub fn failed(&self, err: &WorkerError) {
        error!(
            correlation_id = %self.correlation_id,
            fatal = err.is_fatal(),
            "Render failed: {}", err
        );
    }

    pub fn published(&self, record: &FinalizedRecord) {
        info!(
            correlation_id = %self.correlation_id,
            video = %record.video_path.display(),
            "Render published"
        );
    }
}
