//! Stream protocol shared by the server-side gate (producer) and the client
//! decoder (consumer).
//!
//! A stream is a sequence of frames separated by a blank line. Each frame
//! carries one `event: <name>` line followed by one or more
//! `data: <json-or-text>` lines.

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use strum_macros::EnumString;

use crate::edit::StructuredEdit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StreamEventName {
    AssistantPartial,
    AssistantMessage,
    Result,
    Done,
    Edits,
    Tool,
    Status,
    Error,
}

/// Metadata carried by a `tool` frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMeta {
    /// Total number of edits the tool expects to propose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Number of edits the server has finished processing so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<usize>,
    /// Edits rejected by the intent gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub name: String,
    #[serde(flatten)]
    pub meta: ToolMeta,
}

/// `edits` payloads arrive either as a bare array or wrapped in an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EditsPayload {
    Bare(Vec<StructuredEdit>),
    Wrapped { edits: Vec<StructuredEdit> },
}

impl EditsPayload {
    pub fn into_edits(self) -> Vec<StructuredEdit> {
        match self {
            EditsPayload::Bare(edits) | EditsPayload::Wrapped { edits } => edits,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RawEditType {
    Insert,
    Delete,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPosition {
    pub line: usize,
}

/// Line-oriented edit as emitted by the agent tool layer, before it is
/// validated and translated into a [`StructuredEdit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEdit {
    pub edit_type: RawEditType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub position: RawPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_line_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
}

/// One encoded stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: StreamEventName,
    pub data: String,
}

impl Frame {
    pub fn new(event: StreamEventName, data: impl Into<String>) -> Self {
        Self {
            event,
            data: data.into(),
        }
    }

    pub fn json<T: Serialize>(event: StreamEventName, payload: &T) -> serde_json::Result<Self> {
        Ok(Self::new(event, serde_json::to_string(payload)?))
    }

    /// Render the frame including its trailing blank-line delimiter.
    /// Multi-line data is split across several `data:` lines.
    pub fn encode(&self) -> String {
        let mut out = format!("event: {}\n", self.event);
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn event_names_use_snake_case() {
        assert_eq!(
            StreamEventName::from_str("assistant_partial").ok(),
            Some(StreamEventName::AssistantPartial)
        );
        assert_eq!(StreamEventName::Edits.to_string(), "edits");
        assert!(StreamEventName::from_str("heartbeat").is_err());
    }

    #[test]
    fn encodes_multiline_data() {
        let frame = Frame::new(StreamEventName::AssistantPartial, "one\ntwo");
        assert_eq!(
            frame.encode(),
            "event: assistant_partial\ndata: one\ndata: two\n\n"
        );
    }

    #[test]
    fn raw_edit_uses_camel_case_fields() {
        let raw: RawEdit = serde_json::from_str(
            r#"{"editType":"delete","position":{"line":4},"originalLineCount":2}"#,
        )
        .expect("parse raw edit");
        assert_eq!(raw.edit_type, RawEditType::Delete);
        assert_eq!(raw.position.line, 4);
        assert_eq!(raw.original_line_count, Some(2));
        assert_eq!(raw.content, None);
    }

    #[test]
    fn edits_payload_accepts_bare_and_wrapped() {
        let bare: EditsPayload =
            serde_json::from_str(r#"[{"oldSpan":"a","newSpan":"b"}]"#).expect("bare");
        let wrapped: EditsPayload =
            serde_json::from_str(r#"{"edits":[{"oldSpan":"a","newSpan":"b"}]}"#).expect("wrapped");
        assert_eq!(bare.into_edits(), wrapped.into_edits());
    }
}
