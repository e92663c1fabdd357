//! Render session controller.
//!
//! Owns the worker's single session and, once it completes, drives the
//! render: virtual display, synthesis process, paced segment stream,
//! capture, cleanup and publication of the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, Instrument};

use librend_media::{remove_dir_if_exists, video_output_path, working_dir_path};
use librend_models::{CorrelationId, FinalizedRecord, Segment};
use librend_queue::ResultQueue;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::RenderLogger;
use crate::metrics;
use crate::protocol::ProtocolClient;
use crate::session::{Admission, CompletedSession, SessionBuffer, SessionState};

/// The external processes a render is made of.
///
/// Handles are owned values: whatever is acquired is handed back to the
/// backend to be released, or dropped (and killed) on a failure path.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    type Display: Send + Sync;
    type Synthesis: Send;
    type Capture: Send;

    async fn acquire_display(&self) -> WorkerResult<Self::Display>;

    async fn launch_synthesis(
        &self,
        correlation_id: &CorrelationId,
        display: &Self::Display,
    ) -> WorkerResult<Self::Synthesis>;

    /// Wait for the synthesis process to exit on its own.
    async fn wait_synthesis(&self, synthesis: &mut Self::Synthesis) -> WorkerResult<()>;

    /// Kill a synthesis process that is still running.
    async fn abort_synthesis(&self, synthesis: Self::Synthesis) -> WorkerResult<()>;

    async fn start_capture(&self, display: &Self::Display, output: &Path) -> WorkerResult<Self::Capture>;

    /// Stop capture; returns once the output file is complete.
    async fn stop_capture(&self, capture: Self::Capture) -> WorkerResult<PathBuf>;

    async fn release_display(&self, display: Self::Display) -> WorkerResult<()>;
}

/// Where finished records go.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, record: &FinalizedRecord) -> WorkerResult<()>;
}

#[async_trait]
impl ResultPublisher for ResultQueue {
    async fn publish(&self, record: &FinalizedRecord) -> WorkerResult<()> {
        ResultQueue::publish(self, record)
            .await
            .map_err(|e| WorkerError::publish(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl<T: ResultPublisher + ?Sized> ResultPublisher for Arc<T> {
    async fn publish(&self, record: &FinalizedRecord) -> WorkerResult<()> {
        (**self).publish(record).await
    }
}

/// Paths and limits for a render.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub storage_dir: PathBuf,
    pub screens_dir: PathBuf,
    pub synthesis_timeout: Option<Duration>,
}

/// State machine over the worker's single session.
pub struct RenderSessionController<B: RenderBackend, P: ResultPublisher> {
    buffer: SessionBuffer,
    backend: B,
    publisher: P,
    protocol: ProtocolClient,
    settings: RenderSettings,
}

impl<B: RenderBackend, P: ResultPublisher> RenderSessionController<B, P> {
    pub fn new(backend: B, publisher: P, protocol: ProtocolClient, settings: RenderSettings) -> Self {
        Self {
            buffer: SessionBuffer::new(),
            backend,
            publisher,
            protocol,
            settings,
        }
    }

    pub fn state(&self) -> SessionState {
        self.buffer.state()
    }

    pub fn buffer(&self) -> &SessionBuffer {
        &self.buffer
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Offer a segment to the session buffer.
    pub fn admit(&mut self, segment: Segment) -> Admission {
        let admission = self.buffer.admit(segment);
        metrics::set_session_active(self.buffer.state() != SessionState::Idle);
        admission
    }

    /// Render a completed session, publish its record and return to idle.
    ///
    /// Any error is fatal to the worker. The display is released on every
    /// path; synthesis and capture are stopped on a best-effort basis.
    pub async fn finalize(&mut self, session: CompletedSession) -> WorkerResult<FinalizedRecord> {
        if self.buffer.state() != SessionState::Finalizing {
            return Err(WorkerError::InvalidState(format!(
                "finalize requested while {}",
                self.buffer.state()
            )));
        }

        let logger = RenderLogger::for_session(&session);
        let span = logger.span();
        let started = Instant::now();

        let result = self.render_and_publish(&session, &logger).instrument(span).await;
        match &result {
            Ok(_) => {
                metrics::record_render_completed(started.elapsed().as_secs_f64());
                self.buffer.reset();
                metrics::set_session_active(false);
            }
            Err(e) => {
                metrics::record_render_failed();
                logger.failed(e);
            }
        }
        result
    }

    async fn render_and_publish(
        &self,
        session: &CompletedSession,
        logger: &RenderLogger,
    ) -> WorkerResult<FinalizedRecord> {
        let terminal = session
            .terminal()
            .ok_or_else(|| WorkerError::InvalidState("completed session has no terminal item".to_string()))?;
        let output = video_output_path(&self.settings.storage_dir, &session.correlation_id)?;
        let screens = working_dir_path(&self.settings.screens_dir, &session.correlation_id)?;
        logger.started();

        let display = self.backend.acquire_display().await?;
        let rendered = self.render_on_display(session, &display, &output, logger).await;
        let released = self.backend.release_display(display).await;
        let video_path = rendered?;
        released?;
        logger.step("display released");

        if remove_dir_if_exists(&screens).await? {
            logger.step("synthesis artifacts removed");
        }

        let record = FinalizedRecord::from_terminal(terminal, video_path);
        self.publisher.publish(&record).await?;
        logger.published(&record);
        Ok(record)
    }

    async fn render_on_display(
        &self,
        session: &CompletedSession,
        display: &B::Display,
        output: &Path,
        logger: &RenderLogger,
    ) -> WorkerResult<PathBuf> {
        let mut synthesis = self
            .backend
            .launch_synthesis(&session.correlation_id, display)
            .await?;

        let (terminal_tx, terminal_rx) = oneshot::channel();
        let client = self.protocol.clone();
        let segments = session.segments.clone();
        let mut stream_task: JoinHandle<WorkerResult<()>> =
            tokio::spawn(async move { client.stream(&segments, terminal_tx).await }.in_current_span());

        // Capture starts when the terminal item is on the wire. A terminal
        // signal that is ready alongside the synthesis exit takes priority.
        let first = tokio::select! {
            biased;
            reached = terminal_rx => match reached {
                Ok(()) => FirstEvent::TerminalSent,
                Err(_) => FirstEvent::StreamEnded,
            },
            exited = self.backend.wait_synthesis(&mut synthesis) => FirstEvent::SynthesisExited(exited),
        };
        match first {
            FirstEvent::TerminalSent => {}
            FirstEvent::StreamEnded => {
                let cause = join_stream(&mut stream_task)
                    .await
                    .err()
                    .unwrap_or_else(|| WorkerError::protocol("stream ended without a terminal item"));
                self.abort_synthesis(synthesis, logger).await;
                return Err(cause);
            }
            FirstEvent::SynthesisExited(exited) => {
                stream_task.abort();
                let _ = stream_task.await;
                return Err(exited.err().unwrap_or_else(|| {
                    WorkerError::process_failed("synthesis exited before the terminal item was sent")
                }));
            }
        }

        let capture = match self.backend.start_capture(display, output).await {
            Ok(capture) => capture,
            Err(e) => {
                stream_task.abort();
                let _ = stream_task.await;
                self.abort_synthesis(synthesis, logger).await;
                return Err(e);
            }
        };
        logger.step("terminal item sent, capture started");

        let waited = match self.settings.synthesis_timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.wait_synthesis(&mut synthesis))
                .await
                .unwrap_or_else(|_| {
                    Err(WorkerError::process_failed(format!(
                        "synthesis still running after {:?}",
                        limit
                    )))
                }),
            None => self.backend.wait_synthesis(&mut synthesis).await,
        };
        let streamed = join_stream(&mut stream_task).await;

        if let Err(e) = waited.and(streamed) {
            self.abort_synthesis(synthesis, logger).await;
            if let Err(stop_err) = self.backend.stop_capture(capture).await {
                logger.cleanup_failed("capture stop", &stop_err);
            }
            return Err(e);
        }
        logger.step("synthesis exited");

        let video_path = self.backend.stop_capture(capture).await?;
        logger.step("capture finalized");
        Ok(video_path)
    }

    async fn abort_synthesis(&self, synthesis: B::Synthesis, logger: &RenderLogger) {
        if let Err(e) = self.backend.abort_synthesis(synthesis).await {
            logger.cleanup_failed("synthesis abort", &e);
        }
    }
}

enum FirstEvent {
    TerminalSent,
    StreamEnded,
    SynthesisExited(WorkerResult<()>),
}

async fn join_stream(task: &mut JoinHandle<WorkerResult<()>>) -> WorkerResult<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(WorkerError::protocol(format!("stream task failed: {}", e))),
    }
}

/// Log the outcome of an admission.
pub fn log_admission(correlation_id: &CorrelationId, admission: &Admission) {
    match admission {
        Admission::Accepted => {
            metrics::record_segment_accepted();
        }
        Admission::Completed(done) => {
            metrics::record_segment_accepted();
            info!(
                correlation_id = %correlation_id,
                segments = done.segments.len(),
                "Session complete, rendering"
            );
        }
        Admission::Rejected(reason) => {
            metrics::record_segment_rejected(reason.label());
            info!(correlation_id = %correlation_id, "Segment rejected: {}", reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct NoopBackend;

    #[async_trait]
    impl RenderBackend for NoopBackend {
        type Display = ();
        type Synthesis = ();
        type Capture = ();

        async fn acquire_display(&self) -> WorkerResult<()> {
            Err(WorkerError::process_failed("no display"))
        }
        async fn launch_synthesis(&self, _: &CorrelationId, _: &()) -> WorkerResult<()> {
            Ok(())
        }
        async fn wait_synthesis(&self, _: &mut ()) -> WorkerResult<()> {
            Ok(())
        }
        async fn abort_synthesis(&self, _: ()) -> WorkerResult<()> {
            Ok(())
        }
        async fn start_capture(&self, _: &(), _: &Path) -> WorkerResult<()> {
            Ok(())
        }
        async fn stop_capture(&self, _: ()) -> WorkerResult<PathBuf> {
            Ok(PathBuf::new())
        }
        async fn release_display(&self, _: ()) -> WorkerResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Records(Mutex<Vec<FinalizedRecord>>);

    #[async_trait]
    impl ResultPublisher for Records {
        async fn publish(&self, record: &FinalizedRecord) -> WorkerResult<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn controller() -> RenderSessionController<NoopBackend, Records> {
        RenderSessionController::new(
            NoopBackend,
            Records::default(),
            ProtocolClient::new(Default::default()),
            RenderSettings {
                storage_dir: PathBuf::from("/tmp"),
                screens_dir: PathBuf::from("/tmp"),
                synthesis_timeout: None,
            },
        )
    }

    #[tokio::test]
    async fn test_finalize_requires_finalizing_state() {
        let mut controller = controller();
        let session = CompletedSession {
            correlation_id: CorrelationId::from("abc"),
            segments: vec![Segment::finalize("abc", 1)],
        };

        assert!(matches!(
            controller.finalize(session).await,
            Err(WorkerError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_display_failure_is_fatal_and_publishes_nothing() {
        let mut controller = controller();
        let Admission::Completed(session) = controller.admit(Segment::finalize("abc", 1)) else {
            panic!("expected completion");
        };

        let err = controller.finalize(session).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(controller.publisher().0.lock().unwrap().is_empty());
        assert_eq!(controller.state(), SessionState::Finalizing);
    }
}
