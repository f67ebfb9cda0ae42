use serde::Deserialize;
use serde::Serialize;

use crate::edit::StructuredEdit;
use crate::wire::ToolMeta;

/// Typed, ordered output of the stream decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamSignal {
    /// Text appended to the visible transcript.
    TextDelta { chunk: String },
    /// The visible transcript was replaced wholesale.
    TextSnapshot { full: String },
    ToolInvoked { name: String, meta: ToolMeta },
    EditsReceived { edits: Vec<StructuredEdit> },
    StatusChanged { state: String },
    ErrorOccurred { message: String },
    Done,
}

impl StreamSignal {
    pub fn text_delta(chunk: impl Into<String>) -> Self {
        StreamSignal::TextDelta {
            chunk: chunk.into(),
        }
    }

    pub fn is_text_delta(&self) -> bool {
        matches!(self, StreamSignal::TextDelta { .. })
    }
}
