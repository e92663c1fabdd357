//! Redis Streams transport for the rendering worker.
//!
//! This crate provides:
//! - Segment consumption from the inbound stream with ack/requeue
//! - Result publishing to a stream reserved for this worker's output
//! - Queue configuration from the environment

pub mod error;
pub mod publisher;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use publisher::ResultQueue;
pub use queue::{Delivery, QueueConfig, SegmentQueue};
