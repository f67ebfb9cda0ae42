use std::str::FromStr;

use livepatch_protocol::StreamEventName;
use livepatch_protocol::StreamSignal;
use livepatch_protocol::ToolMeta;
use livepatch_protocol::wire::EditsPayload;
use livepatch_protocol::wire::ToolEvent;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// A frame whose payload could not be parsed. The frame is skipped and
/// decoding continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed `{event}` frame: {reason}")]
pub struct MalformedFrame {
    pub event: String,
    pub reason: String,
}

/// Pure frame-to-signal translation, including snapshot reconciliation.
///
/// `committed` is the longest text emitted so far. Visible output never
/// regresses: a shorter snapshot is dropped, an extending snapshot is turned
/// into a delta, and a diverging one replaces the transcript outright.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    committed: String,
    finished: bool,
}

impl FrameDecoder {
    pub fn committed(&self) -> &str {
        &self.committed
    }

    /// True once a `done` frame has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn decode(&mut self, event: &str, data: &str) -> Result<Vec<StreamSignal>, MalformedFrame> {
        let Ok(name) = StreamEventName::from_str(event.trim()) else {
            trace!(event, "ignoring unknown stream event");
            return Ok(Vec::new());
        };
        let malformed = |reason: String| MalformedFrame {
            event: name.to_string(),
            reason,
        };

        let signals = match name {
            StreamEventName::AssistantPartial => {
                match text_payload(data, &["text", "delta", "content"]).map_err(malformed)? {
                    Some(chunk) if !chunk.is_empty() => {
                        self.committed.push_str(&chunk);
                        vec![StreamSignal::TextDelta { chunk }]
                    }
                    _ => Vec::new(),
                }
            }
            StreamEventName::AssistantMessage | StreamEventName::Result => {
                match text_payload(data, &["text", "content", "message", "result"])
                    .map_err(malformed)?
                {
                    Some(snapshot) => self.reconcile(snapshot).into_iter().collect(),
                    None => Vec::new(),
                }
            }
            StreamEventName::Done => {
                let snapshot = if data.trim().is_empty() {
                    None
                } else {
                    text_payload(data, &["text", "content", "message", "result"])
                        .map_err(malformed)?
                };
                let mut signals: Vec<StreamSignal> =
                    snapshot.and_then(|s| self.reconcile(s)).into_iter().collect();
                signals.push(StreamSignal::Done);
                self.finished = true;
                signals
            }
            StreamEventName::Edits => {
                let payload: EditsPayload =
                    serde_json::from_str(data).map_err(|e| malformed(e.to_string()))?;
                let edits = payload.into_edits();
                if edits.is_empty() {
                    Vec::new()
                } else {
                    vec![StreamSignal::EditsReceived { edits }]
                }
            }
            StreamEventName::Tool => {
                let event = if looks_structured(data) {
                    serde_json::from_str::<ToolEvent>(data).map_err(|e| malformed(e.to_string()))?
                } else {
                    ToolEvent {
                        name: data.trim().to_string(),
                        meta: ToolMeta::default(),
                    }
                };
                vec![StreamSignal::ToolInvoked {
                    name: event.name,
                    meta: event.meta,
                }]
            }
            StreamEventName::Status => {
                match text_payload(data, &["state", "status"]).map_err(malformed)? {
                    Some(state) => vec![StreamSignal::StatusChanged { state }],
                    None => Vec::new(),
                }
            }
            StreamEventName::Error => {
                let message = text_payload(data, &["message", "error"])
                    .map_err(malformed)?
                    .unwrap_or_else(|| "unknown error".to_string());
                vec![StreamSignal::ErrorOccurred { message }]
            }
        };
        Ok(signals)
    }

    fn reconcile(&mut self, snapshot: String) -> Option<StreamSignal> {
        if snapshot.len() < self.committed.len() {
            trace!(
                snapshot_len = snapshot.len(),
                committed_len = self.committed.len(),
                "dropping regressive snapshot"
            );
            return None;
        }
        if let Some(suffix) = snapshot.strip_prefix(self.committed.as_str()) {
            if suffix.is_empty() {
                return None;
            }
            let chunk = suffix.to_string();
            self.committed = snapshot;
            return Some(StreamSignal::TextDelta { chunk });
        }
        self.committed = snapshot.clone();
        Some(StreamSignal::TextSnapshot { full: snapshot })
    }
}

fn looks_structured(data: &str) -> bool {
    matches!(data.trim_start().chars().next(), Some('{' | '[' | '"'))
}

/// Extract text from a payload that may be a JSON string, a JSON object
/// carrying one of `keys`, or plain text.
fn text_payload(data: &str, keys: &[&str]) -> Result<Option<String>, String> {
    if !looks_structured(data) {
        return Ok(Some(data.to_string()));
    }
    let value: Value = serde_json::from_str(data).map_err(|e| e.to_string())?;
    Ok(match value {
        Value::String(text) => Some(text),
        Value::Object(map) => keys
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(ToString::to_string),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepatch_protocol::StructuredEdit;
    use pretty_assertions::assert_eq;

    fn delta(chunk: &str) -> StreamSignal {
        StreamSignal::text_delta(chunk)
    }

    #[test]
    fn regressive_snapshot_is_discarded() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(
            decoder.decode("assistant_partial", "Hello"),
            Ok(vec![delta("Hello")])
        );
        assert_eq!(decoder.decode("assistant_message", "Hel"), Ok(vec![]));
        assert_eq!(decoder.committed(), "Hello");
    }

    #[test]
    fn extending_snapshot_emits_only_the_suffix() {
        let mut decoder = FrameDecoder::default();
        decoder
            .decode("assistant_partial", r#"{"text":"Hello"}"#)
            .expect("partial");
        assert_eq!(
            decoder.decode("result", r#""Hello, world""#),
            Ok(vec![delta(", world")])
        );
        assert_eq!(decoder.decode("result", "Hello, world"), Ok(vec![]));
    }

    #[test]
    fn diverging_snapshot_replaces_committed_text() {
        let mut decoder = FrameDecoder::default();
        decoder.decode("assistant_partial", "Hello").expect("partial");
        assert_eq!(
            decoder.decode("assistant_message", "Howdy!"),
            Ok(vec![StreamSignal::TextSnapshot {
                full: "Howdy!".to_string()
            }])
        );
        assert_eq!(decoder.committed(), "Howdy!");
    }

    #[test]
    fn done_reconciles_then_finishes() {
        let mut decoder = FrameDecoder::default();
        decoder.decode("assistant_partial", "ab").expect("partial");
        assert_eq!(
            decoder.decode("done", r#"{"text":"abc"}"#),
            Ok(vec![delta("c"), StreamSignal::Done])
        );
        assert!(decoder.is_finished());

        let mut empty = FrameDecoder::default();
        assert_eq!(empty.decode("done", ""), Ok(vec![StreamSignal::Done]));
    }

    #[test]
    fn malformed_json_is_reported_not_fatal() {
        let mut decoder = FrameDecoder::default();
        let err = decoder
            .decode("edits", r#"[{"oldSpan": "a""#)
            .expect_err("truncated json");
        assert_eq!(err.event, "edits");
        // The decoder keeps working afterwards.
        assert_eq!(decoder.decode("assistant_partial", "ok"), Ok(vec![delta("ok")]));
    }

    #[test]
    fn unknown_events_are_ignored() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.decode("heartbeat", "{}"), Ok(vec![]));
        assert_eq!(decoder.decode("message", "hi"), Ok(vec![]));
    }

    #[test]
    fn decodes_edits_tool_status_and_error() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(
            decoder.decode("edits", r#"{"edits":[{"oldSpan":"a","newSpan":"b"}]}"#),
            Ok(vec![StreamSignal::EditsReceived {
                edits: vec![StructuredEdit::new("a", "b")]
            }])
        );
        assert_eq!(
            decoder.decode("tool", r#"{"name":"propose_edits","count":2,"violations":1}"#),
            Ok(vec![StreamSignal::ToolInvoked {
                name: "propose_edits".to_string(),
                meta: ToolMeta {
                    count: Some(2),
                    violations: Some(1),
                    ..Default::default()
                },
            }])
        );
        assert_eq!(
            decoder.decode("status", r#"{"state":"thinking"}"#),
            Ok(vec![StreamSignal::StatusChanged {
                state: "thinking".to_string()
            }])
        );
        assert_eq!(
            decoder.decode("error", "quota exhausted"),
            Ok(vec![StreamSignal::ErrorOccurred {
                message: "quota exhausted".to_string()
            }])
        );
    }
}
