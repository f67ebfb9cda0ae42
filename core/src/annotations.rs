//! Overlay ranges derived from the pending suggestions and the active buffer.

use std::ops::Range;

use livepatch_protocol::EditSuggestion;
use livepatch_protocol::SuggestionId;
use serde::Serialize;
use tracing::trace;

use crate::document::ActiveBuffer;
use crate::patch::line_count;
use crate::patch::line_span;
use crate::patch::resolve_range;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    /// Text the suggestion would remove. `lines` is the inclusive 1-based span.
    DeletedSpan {
        suggestion: SuggestionId,
        range: Range<usize>,
        lines: (usize, usize),
    },
    /// Replacement text shown right after the old range.
    InsertedPreview {
        suggestion: SuggestionId,
        offset: usize,
        text: String,
    },
}

impl Overlay {
    pub fn offset(&self) -> usize {
        match self {
            Overlay::DeletedSpan { range, .. } => range.start,
            Overlay::InsertedPreview { offset, .. } => *offset,
        }
    }
}

/// Receives the full overlay set. Each call replaces the previous set.
pub trait OverlaySink {
    fn apply_overlays(&mut self, overlays: &[Overlay]);
}

/// Sink that keeps every set it was handed.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub applied: Vec<Vec<Overlay>>,
}

impl RecordingSink {
    pub fn current(&self) -> &[Overlay] {
        self.applied.last().map(Vec::as_slice).unwrap_or_default()
    }
}

impl OverlaySink for RecordingSink {
    fn apply_overlays(&mut self, overlays: &[Overlay]) {
        self.applied.push(overlays.to_vec());
    }
}

#[derive(Debug)]
pub struct AnnotationRenderer {
    preview_width: usize,
    current: Vec<Overlay>,
}

impl AnnotationRenderer {
    pub fn new(preview_width: usize) -> Self {
        Self {
            preview_width,
            current: Vec::new(),
        }
    }

    pub fn current(&self) -> &[Overlay] {
        &self.current
    }

    /// Recompute overlays and hand them to `sink` when they changed.
    /// Returns whether the sink was called.
    pub fn recompute(
        &mut self,
        suggestions: &[EditSuggestion],
        buffer: &dyn ActiveBuffer,
        sink: &mut dyn OverlaySink,
    ) -> bool {
        let next = self.compute(suggestions, buffer);
        if next == self.current {
            return false;
        }
        trace!(count = next.len(), "overlays replaced");
        sink.apply_overlays(&next);
        self.current = next;
        true
    }

    pub fn compute(&self, suggestions: &[EditSuggestion], buffer: &dyn ActiveBuffer) -> Vec<Overlay> {
        let text = buffer.text();
        let total_lines = line_count(text);
        let mut overlays = Vec::new();

        for suggestion in suggestions
            .iter()
            .filter(|s| s.is_pending() && s.edit.targets_active(buffer.path()))
        {
            // The buffer shrank below the line the suggestion was made for.
            if suggestion
                .derived_start_line
                .is_some_and(|line| line > total_lines)
            {
                continue;
            }
            let Ok(range) = resolve_range(text, &suggestion.edit) else {
                continue;
            };
            let lines = line_span(text, &range);
            if !range.is_empty() {
                overlays.push(Overlay::DeletedSpan {
                    suggestion: suggestion.id,
                    range: range.clone(),
                    lines,
                });
            }
            if !suggestion.edit.new_span.is_empty() {
                overlays.push(Overlay::InsertedPreview {
                    suggestion: suggestion.id,
                    offset: range.end,
                    text: preview(&suggestion.edit.new_span, self.preview_width),
                });
            }
        }
        overlays.sort_by_key(Overlay::offset);
        overlays
    }
}

/// Single-line preview: newlines collapse to spaces, long text is cut with
/// an ellipsis.
fn preview(text: &str, width: usize) -> String {
    let collapsed = text
        .split(['\n', '\r'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
