//! Libras rendering worker.
//!
//! This crate provides:
//! - Session buffering and completion detection for one request at a time
//! - The render controller driving display, synthesis and capture
//! - The paced socket protocol spoken to the synthesis process
//! - Broker keep-alive and graceful shutdown

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod keepalive;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod retry;
pub mod session;

pub use backend::ProcessBackend;
pub use config::WorkerConfig;
pub use controller::{RenderBackend, RenderSessionController, RenderSettings, ResultPublisher};
pub use error::{WorkerError, WorkerResult};
pub use executor::{DeliverySource, RenderExecutor};
pub use logging::RenderLogger;
pub use protocol::{ProtocolClient, ProtocolConfig};
pub use session::{Admission, CompletedSession, RejectReason, SessionBuffer, SessionState};
