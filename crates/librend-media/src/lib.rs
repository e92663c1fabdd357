//! External process management for the rendering worker.
//!
//! This crate provides:
//! - Owned process handles with typed signal/wait/terminate operations
//! - Virtual X displays (Xvfb) for off-screen rendering
//! - Launching the sign-language synthesis process against a display
//! - Screen capture of a display into a video file via FFmpeg
//! - Filesystem helpers for output and per-request working paths

pub mod capture;
pub mod display;
pub mod error;
pub mod fs_utils;
pub mod process;
pub mod synthesis;

pub use capture::{CaptureCommand, CaptureConfig, CaptureProfile, CaptureRecorder};
pub use display::{DisplayConfig, DisplayTarget, VirtualDisplay};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{ensure_dir, remove_dir_if_exists, video_output_path, working_dir_path};
pub use process::ProcessHandle;
pub use synthesis::{SynthesisCommand, SynthesisConfig};
