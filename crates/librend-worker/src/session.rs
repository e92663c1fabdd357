//! Session buffer and completion detector.
//!
//! Segments for one request are accumulated here until its terminal item
//! arrives with a count that matches what has been buffered. Only one
//! request can be in flight at a time; segments for any other request are
//! rejected so the broker redelivers them later.

use std::fmt;

use librend_models::{CorrelationId, Segment, SegmentPayload};

/// Lifecycle of the worker's single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Accumulating,
    Finalizing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Accumulating => "accumulating",
            SessionState::Finalizing => "finalizing",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a segment was not admitted. Every reason leads to a requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Worker idle and the segment cannot open a session.
    NotSessionStart { position: u32 },
    /// Another request owns the worker.
    SessionConflict {
        active: CorrelationId,
        got: CorrelationId,
    },
    /// Terminal item arrived before all of its segments.
    IncompleteBuffer { buffered: usize, expected: usize },
    /// The active session is already rendering.
    Finalizing,
    /// Payload could not be classified.
    MalformedInput(String),
}

impl RejectReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::NotSessionStart { .. } => "not_session_start",
            RejectReason::SessionConflict { .. } => "session_conflict",
            RejectReason::IncompleteBuffer { .. } => "incomplete_buffer",
            RejectReason::Finalizing => "finalizing",
            RejectReason::MalformedInput(_) => "malformed_input",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotSessionStart { position } => {
                write!(f, "worker idle, position {} cannot open a session", position)
            }
            RejectReason::SessionConflict { active, got } => {
                write!(f, "busy with {}, got segment for {}", active, got)
            }
            RejectReason::IncompleteBuffer { buffered, expected } => {
                write!(f, "{} of {} segments buffered", buffered, expected)
            }
            RejectReason::Finalizing => f.write_str("session is rendering"),
            RejectReason::MalformedInput(msg) => write!(f, "malformed segment: {}", msg),
        }
    }
}

/// A session whose terminal item has been admitted.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSession {
    pub correlation_id: CorrelationId,
    /// All segments, terminal item included, sorted by declared position
    pub segments: Vec<Segment>,
}

impl CompletedSession {
    /// The terminal control item.
    pub fn terminal(&self) -> Option<&Segment> {
        self.segments.iter().rev().find(|s| s.finalize_total().is_some())
    }
}

/// Outcome of offering a segment to the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accepted,
    /// Accepted, and the session is now complete.
    Completed(CompletedSession),
    Rejected(RejectReason),
}

impl Admission {
    /// Whether the delivery should be acknowledged.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Admission::Rejected(_))
    }
}

/// The active request's segments.
#[derive(Debug, Clone)]
pub struct Session {
    pub correlation_id: CorrelationId,
    pub state: SessionState,
    pub buffer: Vec<Segment>,
    pub expected_total: Option<u32>,
}

/// Serialized admission over at most one session.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    session: Option<Session>,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.session.as_ref().map(|s| &s.correlation_id)
    }

    pub fn buffered_len(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.buffer.len())
    }

    /// Drop the session and return to idle.
    pub fn reset(&mut self) {
        self.session = None;
    }

    /// Offer a segment.
    pub fn admit(&mut self, segment: Segment) -> Admission {
        let Some(session) = self.session.as_mut() else {
            return self.open(segment);
        };

        if segment.correlation_id != session.correlation_id {
            return Admission::Rejected(RejectReason::SessionConflict {
                active: session.correlation_id.clone(),
                got: segment.correlation_id,
            });
        }

        if session.state == SessionState::Finalizing {
            return Admission::Rejected(RejectReason::Finalizing);
        }

        match segment.payload {
            SegmentPayload::GlossText { .. } => {
                session.buffer.push(segment);
                Admission::Accepted
            }
            SegmentPayload::Control { total_count, .. } => {
                let expected = total_count.saturating_sub(1) as usize;
                if session.buffer.len() != expected {
                    return Admission::Rejected(RejectReason::IncompleteBuffer {
                        buffered: session.buffer.len(),
                        expected,
                    });
                }
                session.buffer.push(segment);
                session.expected_total = Some(total_count);
                session.state = SessionState::Finalizing;
                Admission::Completed(Self::completed(session))
            }
        }
    }

    fn open(&mut self, segment: Segment) -> Admission {
        let opens_session = segment.position() == 1 && segment.is_gloss();
        // A request of one item is only its terminal item.
        let single_item = segment.finalize_total() == Some(1);

        if !opens_session && !single_item {
            return Admission::Rejected(RejectReason::NotSessionStart {
                position: segment.position(),
            });
        }

        let session = self.session.insert(Session {
            correlation_id: segment.correlation_id.clone(),
            state: SessionState::Accumulating,
            buffer: vec![segment],
            expected_total: None,
        });

        if single_item {
            session.expected_total = Some(1);
            session.state = SessionState::Finalizing;
            return Admission::Completed(Self::completed(session));
        }
        Admission::Accepted
    }

    fn completed(session: &Session) -> CompletedSession {
        let mut segments = session.buffer.clone();
        segments.sort_by_key(|s| s.position());
        CompletedSession {
            correlation_id: session.correlation_id.clone(),
            segments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(admission: &Admission) -> bool {
        matches!(admission, Admission::Accepted)
    }

    #[test]
    fn test_two_glosses_then_finalize_completes() {
        let mut buffer = SessionBuffer::new();

        assert!(accepted(&buffer.admit(Segment::gloss("abc", 1, "OI", 0))));
        assert_eq!(buffer.buffered_len(), 1);
        assert_eq!(buffer.state(), SessionState::Accumulating);

        assert!(accepted(&buffer.admit(Segment::gloss("abc", 2, "MUNDO", 500))));
        assert_eq!(buffer.buffered_len(), 2);

        match buffer.admit(Segment::finalize("abc", 3)) {
            Admission::Completed(done) => {
                assert_eq!(done.correlation_id.as_str(), "abc");
                assert_eq!(done.segments.len(), 3);
                assert_eq!(done.terminal().and_then(|s| s.finalize_total()), Some(3));
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(buffer.state(), SessionState::Finalizing);

        buffer.reset();
        assert_eq!(buffer.state(), SessionState::Idle);
    }

    #[test]
    fn test_other_request_rejected_while_busy() {
        let mut buffer = SessionBuffer::new();
        buffer.admit(Segment::gloss("abc", 1, "OI", 0));

        let admission = buffer.admit(Segment::gloss("xyz", 1, "TCHAU", 0));
        assert!(matches!(
            admission,
            Admission::Rejected(RejectReason::SessionConflict { .. })
        ));
        assert_eq!(buffer.correlation_id().map(|c| c.as_str()), Some("abc"));
        assert_eq!(buffer.buffered_len(), 1);
    }

    #[test]
    fn test_finalize_with_missing_segment_rejected() {
        let mut buffer = SessionBuffer::new();
        buffer.admit(Segment::gloss("abc", 1, "OI", 0));

        assert_eq!(
            buffer.admit(Segment::finalize("abc", 3)),
            Admission::Rejected(RejectReason::IncompleteBuffer {
                buffered: 1,
                expected: 2
            })
        );
        assert_eq!(buffer.state(), SessionState::Accumulating);

        // The straggler arrives and the redelivered terminal item now fits.
        assert!(accepted(&buffer.admit(Segment::gloss("abc", 2, "MUNDO", 500))));
        assert!(matches!(
            buffer.admit(Segment::finalize("abc", 3)),
            Admission::Completed(_)
        ));
    }

    #[test]
    fn test_finalize_admission_depends_only_on_count() {
        for total in 1..6u32 {
            for buffered in 1..6u32 {
                let mut buffer = SessionBuffer::new();
                for position in 1..=buffered {
                    buffer.admit(Segment::gloss("abc", position, "X", position));
                }
                let completed = buffer.admit(Segment::finalize("abc", total)).is_accepted();
                assert_eq!(completed, buffered == total - 1, "total={total} buffered={buffered}");
            }
        }
    }

    #[test]
    fn test_idle_rejects_non_start_segments() {
        let mut buffer = SessionBuffer::new();

        assert!(matches!(
            buffer.admit(Segment::gloss("abc", 2, "MUNDO", 0)),
            Admission::Rejected(RejectReason::NotSessionStart { position: 2 })
        ));
        assert!(matches!(
            buffer.admit(Segment::finalize("abc", 3)),
            Admission::Rejected(RejectReason::NotSessionStart { position: 3 })
        ));
        assert_eq!(buffer.state(), SessionState::Idle);
    }

    #[test]
    fn test_single_item_request_completes_immediately() {
        let mut buffer = SessionBuffer::new();

        match buffer.admit(Segment::finalize("abc", 1)) {
            Admission::Completed(done) => assert_eq!(done.segments.len(), 1),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(buffer.state(), SessionState::Finalizing);
    }

    #[test]
    fn test_segments_rejected_while_finalizing() {
        let mut buffer = SessionBuffer::new();
        buffer.admit(Segment::gloss("abc", 1, "OI", 0));
        buffer.admit(Segment::finalize("abc", 2));

        assert_eq!(
            buffer.admit(Segment::gloss("abc", 3, "LATE", 0)),
            Admission::Rejected(RejectReason::Finalizing)
        );
    }

    #[test]
    fn test_completed_segments_sorted_by_position() {
        let mut buffer = SessionBuffer::new();
        buffer.admit(Segment::gloss("abc", 1, "A", 0));
        buffer.admit(Segment::gloss("abc", 3, "C", 0));
        buffer.admit(Segment::gloss("abc", 2, "B", 0));

        let Admission::Completed(done) = buffer.admit(Segment::finalize("abc", 4)) else {
            panic!("expected completion");
        };
        let positions: Vec<u32> = done.segments.iter().map(|s| s.position()).collect();
        assert_eq!(positions, vec![1, 2, 3, 4]);
    }
}
