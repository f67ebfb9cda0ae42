use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::edit::EditKind;

/// Identifies one streaming response from the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Pending,
    Success,
    Error,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepState {
    Queued,
    Active,
    Done,
}

/// Visible progress of one run's edit proposals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub state: RunState,
    pub expected_count: usize,
    pub completed_count: usize,
    pub violation_count: Option<usize>,
    pub error_message: Option<String>,
}

impl RunProgress {
    pub fn pending() -> Self {
        Self {
            state: RunState::Pending,
            expected_count: 0,
            completed_count: 0,
            violation_count: None,
            error_message: None,
        }
    }

    /// Per-step display states, derived from `completed_count` alone.
    ///
    /// Steps before the cursor are done; while pending, the step at the
    /// cursor is active and the rest are queued.
    pub fn step_states(&self) -> Vec<StepState> {
        (0..self.expected_count)
            .map(|index| {
                if index < self.completed_count {
                    StepState::Done
                } else if index == self.completed_count && self.state == RunState::Pending {
                    StepState::Active
                } else {
                    StepState::Queued
                }
            })
            .collect()
    }

    pub fn all_counted(&self) -> bool {
        self.expected_count > 0 && self.completed_count >= self.expected_count
    }
}

/// Capability flags gating which edit operations a run may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPermissions {
    pub allow_insert: bool,
    pub allow_delete: bool,
    pub allow_replace: bool,
}

impl RunPermissions {
    pub const ALL: RunPermissions = RunPermissions {
        allow_insert: true,
        allow_delete: true,
        allow_replace: true,
    };

    pub const NONE: RunPermissions = RunPermissions {
        allow_insert: false,
        allow_delete: false,
        allow_replace: false,
    };

    /// Keyword heuristic over the user's request. A request naming no edit
    /// operation at all grants every operation.
    pub fn infer_from_request(request: &str) -> Self {
        let lowered = request.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();
        let mentions = |family: &[&str]| {
            words
                .iter()
                .any(|word| family.iter().any(|keyword| is_inflection_of(word, keyword)))
        };

        let inferred = RunPermissions {
            allow_insert: mentions(INSERT_KEYWORDS),
            allow_delete: mentions(DELETE_KEYWORDS),
            allow_replace: mentions(REPLACE_KEYWORDS),
        };
        if inferred == Self::NONE {
            Self::ALL
        } else {
            inferred
        }
    }

    pub fn allows(&self, kind: EditKind) -> bool {
        match kind {
            EditKind::Insert => self.allow_insert,
            EditKind::Delete => self.allow_delete,
            EditKind::Replace => self.allow_replace,
        }
    }
}

const INSERT_KEYWORDS: &[&str] = &["add", "insert", "append", "write"];
const DELETE_KEYWORDS: &[&str] = &["delete", "remove", "drop", "cut"];
const REPLACE_KEYWORDS: &[&str] = &["replace", "change", "rewrite", "fix", "edit", "update", "rename"];

fn is_inflection_of(word: &str, keyword: &str) -> bool {
    let stem = keyword.strip_suffix('e').unwrap_or(keyword);
    match word.strip_prefix(stem) {
        Some(rest) => {
            matches!(rest, "" | "s" | "es" | "ed" | "d" | "ing")
                || (stem.len() < keyword.len() && rest == "e")
        }
        None => false,
    }
}

impl Default for RunPermissions {
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn step_states_follow_completed_count() {
        let mut progress = RunProgress::pending();
        progress.expected_count = 3;
        progress.completed_count = 1;
        assert_eq!(
            progress.step_states(),
            vec![StepState::Done, StepState::Active, StepState::Queued]
        );

        progress.completed_count = 3;
        progress.state = RunState::Success;
        assert_eq!(progress.step_states(), vec![StepState::Done; 3]);
    }

    #[test]
    fn permissions_follow_request_keywords() {
        assert_eq!(
            RunPermissions::infer_from_request("Please fix the typo in the intro"),
            RunPermissions {
                allow_insert: false,
                allow_delete: false,
                allow_replace: true,
            }
        );
        assert_eq!(
            RunPermissions::infer_from_request("Remove the second paragraph and add a summary"),
            RunPermissions {
                allow_insert: true,
                allow_delete: true,
                allow_replace: false,
            }
        );
        assert_eq!(
            RunPermissions::infer_from_request("Deleting stale notes"),
            RunPermissions {
                allow_insert: false,
                allow_delete: true,
                allow_replace: false,
            }
        );
    }

    #[test]
    fn requests_without_keywords_grant_everything() {
        assert_eq!(
            RunPermissions::infer_from_request("What do you think of section 2?"),
            RunPermissions::ALL
        );
        // "address" is not "add".
        assert_eq!(
            RunPermissions::infer_from_request("address the reviewer"),
            RunPermissions::ALL
        );
    }

    #[test]
    fn errored_runs_show_no_active_step() {
        let progress = RunProgress {
            state: RunState::Error,
            expected_count: 2,
            completed_count: 0,
            violation_count: None,
            error_message: Some("boom".to_string()),
        };
        assert_eq!(progress.step_states(), vec![StepState::Queued; 2]);
    }
}
