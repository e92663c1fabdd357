//! Shared data models for the Libras rendering worker.
//!
//! This crate provides:
//! - Correlation identifiers tying segments to a request
//! - Typed animation segments (gloss text or control markers)
//! - The finalized record published after a render

pub mod error;
pub mod record;
pub mod segment;

pub use error::{ModelError, ModelResult};
pub use record::FinalizedRecord;
pub use segment::{ControlMarker, CorrelationId, Segment, SegmentPayload};
