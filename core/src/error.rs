use livepatch_protocol::SuggestionId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LivepatchErr>;

/// An edit's `old_span` could not be resolved to exactly one range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchConflict {
    #[error("the text to replace was not found in the document")]
    NotFound,

    /// `lines` holds the 1-based line of every match.
    #[error("the text to replace matches {} locations (lines {})", .lines.len(), join_lines(.lines))]
    Ambiguous { lines: Vec<usize> },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    TargetNotFound(String),

    #[error("failed to write {path}: {message}")]
    WriteFailed { path: String, message: String },
}

/// Why a single suggestion could not be applied. Never aborts a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error(transparent)]
    Conflict(#[from] PatchConflict),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("suggestion {0} is not in the pending queue")]
    UnknownSuggestion(SuggestionId),

    /// Another edit in the same batch claimed an overlapping range.
    #[error("overlaps another edit applied in the same batch")]
    Overlap,
}

#[derive(Error, Debug)]
pub enum LivepatchErr {
    #[error("[transport] {0}")]
    Transport(String),

    #[error("[idle] timeout waiting for the next stream frame")]
    IdleTimeout,

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

fn join_lines(lines: &[usize]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
