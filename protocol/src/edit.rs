use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use strum_macros::EnumString;
use uuid::Uuid;

use crate::run::RunId;

/// The operation an edit performs, derived purely from its spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
}

/// An atomic proposed change expressed as an exact-match span pair.
///
/// An empty `old_span` means "append at the end of the document"; an empty
/// `new_span` together with a non-empty `old_span` means "delete".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StructuredEdit {
    /// `None` targets whichever document is currently active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    #[serde(default)]
    pub old_span: String,
    #[serde(default)]
    pub new_span: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// 1-based line hint from the originating context. Display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
}

impl StructuredEdit {
    pub fn new(old_span: impl Into<String>, new_span: impl Into<String>) -> Self {
        Self {
            old_span: old_span.into(),
            new_span: new_span.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target_file: impl Into<String>) -> Self {
        self.target_file = Some(target_file.into());
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn kind(&self) -> EditKind {
        if self.old_span.is_empty() {
            EditKind::Insert
        } else if self.new_span.is_empty() {
            EditKind::Delete
        } else {
            EditKind::Replace
        }
    }

    /// Whether this edit applies to `active_path` (the currently open
    /// document). Untargeted edits always apply to the active document.
    pub fn targets_active(&self, active_path: Option<&str>) -> bool {
        match (self.target_file.as_deref(), active_path) {
            (None, _) => true,
            (Some(target), Some(active)) => target == active,
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuggestionId(Uuid);

impl SuggestionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SuggestionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SuggestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A [`StructuredEdit`] under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSuggestion {
    pub id: SuggestionId,
    pub source_run_id: RunId,
    #[serde(flatten)]
    pub edit: StructuredEdit,
    pub status: SuggestionStatus,
    pub derived_start_line: Option<usize>,
}

impl EditSuggestion {
    pub fn is_pending(&self) -> bool {
        self.status == SuggestionStatus::Pending
    }
}
