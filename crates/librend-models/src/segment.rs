//! Animation segments delivered on the inbound queue.
//!
//! A request is streamed as a run of gloss segments numbered from 1,
//! closed by a `FINALIZE` control segment. The control segment reuses
//! its `index` field to carry the total segment count, so for a request
//! of `T` segments the terminal item has `index == T` and naturally sorts
//! after every gloss item.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{ModelError, ModelResult};

/// JSON key holding the sequence position (total count on the terminal item).
pub const INDEX_KEY: &str = "index";
/// JSON key holding gloss text.
pub const GLOSS_KEY: &str = "gloss";
/// JSON key holding the presentation timestamp.
pub const PTS_KEY: &str = "pts";
/// JSON key holding a control marker.
pub const CONTROL_KEY: &str = "control-message";

/// Identifier tying all segments and the final result to one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Create from an existing string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can name a single entry inside a directory.
    ///
    /// The id becomes a file and directory name on the render host, so it
    /// must not be empty, hidden, or carry separators, `..` or NUL.
    pub fn is_path_safe(&self) -> bool {
        let id = self.0.as_str();
        !id.is_empty()
            && !id.starts_with('.')
            && !id.contains("..")
            && !id.contains(&['/', '\\', '\0'][..])
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Control markers understood by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMarker {
    /// Closes the segment run of a request.
    Finalize,
}

impl ControlMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMarker::Finalize => "FINALIZE",
        }
    }
}

impl fmt::Display for ControlMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlMarker {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FINALIZE" => Ok(ControlMarker::Finalize),
            other => Err(ModelError::UnknownControlMarker(other.to_string())),
        }
    }
}

/// What a segment carries, decided once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentPayload {
    /// A gloss token with its presentation timestamp.
    ///
    /// The timestamp keeps its original JSON number form so it is sent to
    /// the synthesis process exactly as it arrived.
    GlossText { gloss: String, pts: Number },
    /// A control marker; `total_count` is the terminal item's `index`.
    Control {
        marker: ControlMarker,
        total_count: u32,
    },
}

/// One unit of a per-request animation stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Declared sequence position (total count for the terminal item).
    pub index: u32,
    pub correlation_id: CorrelationId,
    pub payload: SegmentPayload,
    /// The original JSON object, kept so the terminal item's metadata can
    /// be forwarded with the result.
    pub body: Map<String, Value>,
}

impl Segment {
    /// Parse a segment from its correlation metadata and JSON body.
    ///
    /// Presence of `control-message` selects a control item; otherwise
    /// `gloss` and `pts` are required. Anything else is malformed.
    pub fn parse(correlation_id: Option<&str>, body: &str) -> ModelResult<Self> {
        let correlation_id = correlation_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ModelError::malformed("missing correlation id"))?;
        if !CorrelationId::from(correlation_id).is_path_safe() {
            return Err(ModelError::malformed(format!(
                "correlation id {correlation_id:?} is not a plain name"
            )));
        }

        let map = match serde_json::from_str::<Value>(body)? {
            Value::Object(map) => map,
            _ => return Err(ModelError::malformed("body is not a JSON object")),
        };

        let index = map
            .get(INDEX_KEY)
            .and_then(Value::as_u64)
            .filter(|index| *index >= 1)
            .and_then(|index| u32::try_from(index).ok())
            .ok_or_else(|| ModelError::malformed("missing or invalid index"))?;

        let payload = match map.get(CONTROL_KEY) {
            Some(marker) => {
                let marker = marker
                    .as_str()
                    .ok_or_else(|| ModelError::malformed("control-message is not a string"))?;
                SegmentPayload::Control {
                    marker: marker.parse()?,
                    total_count: index,
                }
            }
            None => {
                let gloss = map
                    .get(GLOSS_KEY)
                    .and_then(Value::as_str)
                    .ok_or_else(|| ModelError::malformed("missing gloss"))?;
                let pts = match map.get(PTS_KEY) {
                    Some(Value::Number(pts)) => pts.clone(),
                    _ => return Err(ModelError::malformed("missing or non-numeric pts")),
                };
                SegmentPayload::GlossText {
                    gloss: gloss.to_string(),
                    pts,
                }
            }
        };

        Ok(Self {
            index,
            correlation_id: CorrelationId::new(correlation_id),
            payload,
            body: map,
        })
    }

    /// Build a gloss segment.
    pub fn gloss(
        correlation_id: impl Into<String>,
        index: u32,
        gloss: impl Into<String>,
        pts: impl Into<Number>,
    ) -> Self {
        let gloss = gloss.into();
        let pts = pts.into();
        let mut body = Map::new();
        body.insert(INDEX_KEY.to_string(), Value::from(index));
        body.insert(GLOSS_KEY.to_string(), Value::String(gloss.clone()));
        body.insert(PTS_KEY.to_string(), Value::Number(pts.clone()));

        Self {
            index,
            correlation_id: CorrelationId::new(correlation_id),
            payload: SegmentPayload::GlossText { gloss, pts },
            body,
        }
    }

    /// Build the terminal `FINALIZE` segment for a request of `total` items.
    pub fn finalize(correlation_id: impl Into<String>, total: u32) -> Self {
        let mut body = Map::new();
        body.insert(INDEX_KEY.to_string(), Value::from(total));
        body.insert(
            CONTROL_KEY.to_string(),
            Value::String(ControlMarker::Finalize.to_string()),
        );

        Self {
            index: total,
            correlation_id: CorrelationId::new(correlation_id),
            payload: SegmentPayload::Control {
                marker: ControlMarker::Finalize,
                total_count: total,
            },
            body,
        }
    }

    /// Declared sequence position.
    pub fn position(&self) -> u32 {
        self.index
    }

    pub fn is_gloss(&self) -> bool {
        matches!(self.payload, SegmentPayload::GlossText { .. })
    }

    /// Total count declared by a `FINALIZE` item.
    pub fn finalize_total(&self) -> Option<u32> {
        match self.payload {
            SegmentPayload::Control {
                marker: ControlMarker::Finalize,
                total_count,
            } => Some(total_count),
            _ => None,
        }
    }

    /// Serialize the original body back to JSON.
    pub fn body_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gloss_segment() {
        let segment = Segment::parse(Some("abc"), r#"{"index": 1, "gloss": "OI", "pts": 1500}"#)
            .expect("gloss segment");

        assert_eq!(segment.position(), 1);
        assert_eq!(segment.correlation_id.as_str(), "abc");
        assert!(segment.is_gloss());
        match segment.payload {
            SegmentPayload::GlossText { gloss, pts } => {
                assert_eq!(gloss, "OI");
                assert_eq!(pts.to_string(), "1500");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn terminal_index_is_total_count() {
        let segment = Segment::parse(
            Some("abc"),
            r#"{"index": 3, "control-message": "FINALIZE", "uid": "abc"}"#,
        )
        .expect("control segment");

        assert_eq!(segment.finalize_total(), Some(3));
        assert_eq!(segment.position(), 3);
        assert_eq!(segment.body.get("uid"), Some(&Value::from("abc")));
    }

    #[test]
    fn control_marker_wins_over_gloss_fields() {
        let segment = Segment::parse(
            Some("abc"),
            r#"{"index": 2, "gloss": "X", "pts": 1, "control-message": "FINALIZE"}"#,
        )
        .unwrap();
        assert_eq!(segment.finalize_total(), Some(2));
    }

    #[test]
    fn float_pts_keeps_textual_form() {
        let segment =
            Segment::parse(Some("abc"), r#"{"index": 1, "gloss": "OI", "pts": 12.5}"#).unwrap();
        match segment.payload {
            SegmentPayload::GlossText { pts, .. } => assert_eq!(pts.to_string(), "12.5"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_bodies() {
        let cases = [
            (Some("abc"), r#"{"gloss": "OI", "pts": 1}"#),
            (Some("abc"), r#"{"index": 0, "gloss": "OI", "pts": 1}"#),
            (Some("abc"), r#"{"index": -2, "gloss": "OI", "pts": 1}"#),
            (Some("abc"), r#"{"index": 1, "pts": 1}"#),
            (Some("abc"), r#"{"index": 1, "gloss": "OI"}"#),
            (Some("abc"), r#"{"index": 1, "gloss": "OI", "pts": "1"}"#),
            (Some("abc"), r#"[1, 2, 3]"#),
            (Some("abc"), "not json"),
            (None, r#"{"index": 1, "gloss": "OI", "pts": 1}"#),
            (Some("  "), r#"{"index": 1, "gloss": "OI", "pts": 1}"#),
        ];

        for (correlation_id, body) in cases {
            assert!(
                Segment::parse(correlation_id, body).is_err(),
                "expected {body:?} to be rejected"
            );
        }
    }

    #[test]
    fn rejects_correlation_ids_that_name_other_paths() {
        let body = r#"{"index": 1, "gloss": "OI", "pts": 1}"#;
        for id in ["/tmp/precious", "../abc", "a/b", "a\\b", "..", ".hidden", "a\0b"] {
            let err = Segment::parse(Some(id), body).unwrap_err();
            assert!(
                matches!(err, ModelError::MalformedSegment(_)),
                "expected {id:?} to be rejected"
            );
        }

        assert!(Segment::parse(Some("3f2c-abc_01"), body).is_ok());
        assert!(CorrelationId::from("req.v2").is_path_safe());
    }

    #[test]
    fn unknown_control_marker_is_an_error() {
        let err = Segment::parse(Some("abc"), r#"{"index": 2, "control-message": "PAUSE"}"#)
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownControlMarker(m) if m == "PAUSE"));
    }

    #[test]
    fn builders_produce_parseable_bodies() {
        let gloss = Segment::gloss("abc", 2, "MUNDO", 3000);
        let reparsed = Segment::parse(Some("abc"), &gloss.body_json().unwrap()).unwrap();
        assert_eq!(reparsed, gloss);

        let terminal = Segment::finalize("abc", 3);
        let reparsed = Segment::parse(Some("abc"), &terminal.body_json().unwrap()).unwrap();
        assert_eq!(reparsed, terminal);
    }
}
