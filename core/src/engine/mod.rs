//! Commits accepted suggestions to documents.
//!
//! Edits for the active document go through its undoable transaction
//! mechanism; edits for any other document are a read-modify-write against
//! the [`DocumentStore`](crate::document::DocumentStore). Ranges are always
//! re-resolved against the content as it is at the moment of application.

use std::fmt;
use std::ops::Range;

use indexmap::IndexMap;
use livepatch_protocol::EditSuggestion;
use livepatch_protocol::SuggestionId;
use tokio::time::Instant;
use tracing::info;
use tracing::warn;

use crate::document::Workspace;
use crate::error::ApplyError;
use crate::error::DocumentError;
use crate::patch::resolve_range;
use crate::patch::splice;
use crate::queue::ProposalQueue;
use crate::queue::QueueAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Failure,
}

/// A short user-visible message about an accept attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn applied(suggestion: &EditSuggestion) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: format!("Applied edit{}", describe(suggestion)),
        }
    }

    pub fn failed(suggestion: &EditSuggestion, err: &ApplyError) -> Self {
        Self {
            level: NoticeLevel::Failure,
            message: format!("Could not apply edit{}: {err}", describe(suggestion)),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn describe(suggestion: &EditSuggestion) -> String {
    match (&suggestion.edit.target_file, suggestion.derived_start_line) {
        (Some(path), Some(line)) => format!(" in {path} at line {line}"),
        (Some(path), None) => format!(" in {path}"),
        (None, Some(line)) => format!(" at line {line}"),
        (None, None) => String::new(),
    }
}

/// Result of a successful single accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub suggestion: EditSuggestion,
    /// Pending suggestions for the same document that stopped applying.
    pub invalidated: Vec<EditSuggestion>,
}

impl Accepted {
    pub fn notice(&self) -> Notice {
        Notice::applied(&self.suggestion)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: Vec<EditSuggestion>,
    /// Suggestions left pending, with why.
    pub failures: Vec<(EditSuggestion, ApplyError)>,
}

impl BatchOutcome {
    pub fn notices(&self) -> Vec<Notice> {
        let mut notices = Vec::new();
        if !self.applied.is_empty() {
            notices.push(Notice {
                level: NoticeLevel::Success,
                message: format!("Applied {} edit(s)", self.applied.len()),
            });
        }
        notices.extend(
            self.failures
                .iter()
                .map(|(suggestion, err)| Notice::failed(suggestion, err)),
        );
        notices
    }
}

/// Which document an edit lands in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DocumentKey {
    Active,
    Path(String),
}

fn document_key(workspace: &Workspace<'_>, suggestion: &EditSuggestion) -> DocumentKey {
    match suggestion.edit.target_file.as_deref() {
        Some(path) if !workspace.is_active(Some(path)) => DocumentKey::Path(path.to_string()),
        _ => DocumentKey::Active,
    }
}

/// Apply one pending suggestion. On failure the suggestion stays pending.
pub fn accept(
    queue: &mut ProposalQueue,
    id: SuggestionId,
    workspace: &mut Workspace<'_>,
    now: Instant,
) -> Result<Accepted, ApplyError> {
    let Some(suggestion) = queue.get(id).cloned() else {
        return Err(ApplyError::UnknownSuggestion(id));
    };
    let edit = &suggestion.edit;

    let (document, content) = match document_key(workspace, &suggestion) {
        DocumentKey::Active => {
            let range = resolve_range(workspace.buffer.text(), edit)
                .inspect_err(|err| warn!(%id, "accept failed: {err}"))?;
            workspace
                .buffer
                .transact(vec![(range, edit.new_span.clone())]);
            (
                edit.target_file
                    .clone()
                    .or_else(|| workspace.active_path().map(ToString::to_string)),
                workspace.buffer.text().to_string(),
            )
        }
        DocumentKey::Path(path) => {
            let current = workspace
                .store
                .content(&path)
                .ok_or_else(|| DocumentError::TargetNotFound(path.clone()))?;
            let range = resolve_range(&current, edit)
                .inspect_err(|err| warn!(%id, path = %path, "accept failed: {err}"))?;
            let updated = splice(&current, range, &edit.new_span);
            workspace.store.write(&path, updated.clone())?;
            (Some(path), updated)
        }
    };

    let accepted = queue
        .dispatch(QueueAction::MarkAccepted { id }, now)
        .removed
        .into_iter()
        .next()
        .unwrap_or(suggestion);
    let invalidated = queue
        .dispatch(
            QueueAction::Revalidate {
                document,
                active_path: workspace.active_path().map(ToString::to_string),
                content,
            },
            now,
        )
        .removed;
    info!(%id, invalidated = invalidated.len(), "edit applied");
    Ok(Accepted {
        suggestion: accepted,
        invalidated,
    })
}

/// Mark a pending suggestion rejected and drop it.
pub fn reject(queue: &mut ProposalQueue, id: SuggestionId, now: Instant) -> Result<EditSuggestion, ApplyError> {
    queue
        .dispatch(QueueAction::Reject { id }, now)
        .removed
        .into_iter()
        .next()
        .ok_or(ApplyError::UnknownSuggestion(id))
}

/// Apply every pending suggestion. Per document, ranges are resolved once
/// against the current content and applied bottom-to-top in one write.
/// Unresolvable edits are reported and left pending; they never abort the
/// batch.
pub fn accept_all(queue: &mut ProposalQueue, workspace: &mut Workspace<'_>, now: Instant) -> BatchOutcome {
    let mut partitions: IndexMap<DocumentKey, Vec<EditSuggestion>> = IndexMap::new();
    for suggestion in queue.suggestions().iter().filter(|s| s.is_pending()) {
        partitions
            .entry(document_key(workspace, suggestion))
            .or_default()
            .push(suggestion.clone());
    }

    let mut outcome = BatchOutcome::default();
    for (key, suggestions) in partitions {
        let content = match &key {
            DocumentKey::Active => Some(workspace.buffer.text().to_string()),
            DocumentKey::Path(path) => workspace.store.content(path),
        };
        let Some(content) = content else {
            let DocumentKey::Path(path) = key else {
                continue;
            };
            for suggestion in suggestions {
                let err = ApplyError::from(DocumentError::TargetNotFound(path.clone()));
                outcome.failures.push((suggestion, err));
            }
            continue;
        };

        let planned = plan(&content, suggestions, &mut outcome.failures);
        let committed = match &key {
            DocumentKey::Active => {
                workspace.buffer.transact(
                    planned
                        .iter()
                        .map(|(range, s)| (range.clone(), s.edit.new_span.clone()))
                        .collect(),
                );
                Ok(())
            }
            DocumentKey::Path(path) => {
                let mut updated = content;
                for (range, suggestion) in &planned {
                    updated = splice(&updated, range.clone(), &suggestion.edit.new_span);
                }
                workspace.store.write(path, updated)
            }
        };

        match committed {
            Ok(()) => outcome.applied.extend(planned.into_iter().map(|(_, s)| s)),
            Err(err) => {
                warn!("batch write failed: {err}");
                outcome.failures.extend(
                    planned
                        .into_iter()
                        .map(|(_, s)| (s, ApplyError::Document(err.clone()))),
                );
            }
        }
    }

    outcome.applied = outcome
        .applied
        .into_iter()
        .filter_map(|s| {
            queue
                .dispatch(QueueAction::MarkAccepted { id: s.id }, now)
                .removed
                .into_iter()
                .next()
        })
        .collect();
    info!(
        applied = outcome.applied.len(),
        failed = outcome.failures.len(),
        "accept all finished"
    );
    outcome
}

/// Resolve every suggestion against `content` and order them bottom-to-top.
/// When two ranges overlap the later-positioned edit wins.
fn plan(
    content: &str,
    suggestions: Vec<EditSuggestion>,
    failures: &mut Vec<(EditSuggestion, ApplyError)>,
) -> Vec<(Range<usize>, EditSuggestion)> {
    let mut resolved: Vec<(usize, Range<usize>, EditSuggestion)> = Vec::new();
    for (index, suggestion) in suggestions.into_iter().enumerate() {
        match resolve_range(content, &suggestion.edit) {
            Ok(range) => resolved.push((index, range, suggestion)),
            Err(conflict) => failures.push((suggestion, conflict.into())),
        }
    }
    // Descending start; among equal starts the later suggestion goes first
    // so appends keep their arrival order.
    resolved.sort_by(|a, b| b.1.start.cmp(&a.1.start).then(b.0.cmp(&a.0)));

    let mut floor = usize::MAX;
    let mut planned = Vec::with_capacity(resolved.len());
    for (_, range, suggestion) in resolved {
        if range.end > floor {
            failures.push((suggestion, ApplyError::Overlap));
            continue;
        }
        floor = range.start;
        planned.push((range, suggestion));
    }
    planned
}
