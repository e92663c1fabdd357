//! Result record published after a successful render.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::segment::{CorrelationId, Segment};

/// JSON key holding the produced video path.
pub const VIDEO_PATH_KEY: &str = "libras-video";

/// The terminal segment's metadata plus the produced video's path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinalizedRecord {
    pub correlation_id: CorrelationId,
    /// Path of the captured video
    #[serde(rename = "libras-video")]
    pub video_path: PathBuf,
    /// When the capture was finalized
    pub rendered_at: DateTime<Utc>,
    /// Original request metadata, forwarded untouched
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl FinalizedRecord {
    /// Build a record from the terminal segment of a session.
    pub fn from_terminal(terminal: &Segment, video_path: impl Into<PathBuf>) -> Self {
        let mut metadata = terminal.body.clone();
        for reserved in ["correlation_id", VIDEO_PATH_KEY, "rendered_at"] {
            metadata.remove(reserved);
        }

        Self {
            correlation_id: terminal.correlation_id.clone(),
            video_path: video_path.into(),
            rendered_at: Utc::now(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_carries_terminal_metadata_and_video_path() {
        let terminal = Segment::parse(
            Some("abc"),
            r#"{"index": 3, "control-message": "FINALIZE", "uid": "abc", "libras-video": "stale"}"#,
        )
        .unwrap();

        let record = FinalizedRecord::from_terminal(&terminal, "/storage/libras/abc.mp4");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["correlation_id"], "abc");
        assert_eq!(json["libras-video"], "/storage/libras/abc.mp4");
        assert_eq!(json["uid"], "abc");
        assert_eq!(json["index"], 3);
        assert_eq!(json["control-message"], "FINALIZE");
        assert!(json["rendered_at"].is_string());
    }

    #[test]
    fn record_deserializes_back() {
        let terminal = Segment::finalize("xyz", 1);
        let record = FinalizedRecord::from_terminal(&terminal, "/tmp/xyz.mp4");

        let json = serde_json::to_string(&record).unwrap();
        let decoded: FinalizedRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, record);
    }
}
