//! Proposal queue and the per-run progress state machine.
//!
//! All mutation goes through [`ProposalQueue::dispatch`]. Timers are plain
//! deadlines stored in each run's registry entry; the owner sleeps until
//! [`ProposalQueue::next_deadline`] and then calls
//! [`ProposalQueue::poll_timers`]. Dropping a run's entry therefore cancels
//! its timers synchronously.

use std::collections::HashSet;
use std::time::Duration;

use indexmap::IndexMap;
use livepatch_protocol::EditSuggestion;
use livepatch_protocol::RunId;
use livepatch_protocol::RunProgress;
use livepatch_protocol::RunState;
use livepatch_protocol::StructuredEdit;
use livepatch_protocol::SuggestionId;
use livepatch_protocol::SuggestionStatus;
use livepatch_protocol::ToolMeta;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::patch::Located;
use crate::patch::is_applicable;
use crate::patch::line_count;
use crate::patch::line_of_offset;
use crate::patch::locate;

/// An incoming edit paired with its best-effort display line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedEdit {
    pub edit: StructuredEdit,
    pub derived_start_line: Option<usize>,
}

impl ProposedEdit {
    /// Compute the display line from the edit's own hint, else by searching
    /// the target document (falling back to the active buffer).
    pub fn enrich<F>(edit: StructuredEdit, content_of: F) -> Self
    where
        F: Fn(Option<&str>) -> Option<String>,
    {
        let derived_start_line = edit.start_line.or_else(|| {
            let content = content_of(edit.target_file.as_deref()).or_else(|| content_of(None))?;
            if edit.old_span.is_empty() {
                return Some(line_count(&content));
            }
            match locate(&content, &edit.old_span) {
                Located::Unique(range) => Some(line_of_offset(&content, range.start)),
                Located::Ambiguous(offsets) => {
                    offsets.first().map(|offset| line_of_offset(&content, *offset))
                }
                Located::NotFound => None,
            }
        });
        Self {
            edit,
            derived_start_line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    /// A new run takes over the context; progress of every other run is
    /// dropped. Suggestions stay. Progress for `run_id` itself starts with
    /// its first edit-related signal.
    StartRun { run_id: RunId },
    EditsReceived { run_id: RunId, edits: Vec<ProposedEdit> },
    ToolProgress { run_id: RunId, meta: ToolMeta },
    RunFailed { run_id: RunId, message: String },
    MarkAccepted { id: SuggestionId },
    Reject { id: SuggestionId },
    /// Drop pending suggestions for `document` that no longer locate
    /// uniquely in `content`. `document` is the resolved target path.
    Revalidate {
        document: Option<String>,
        active_path: Option<String>,
        content: String,
    },
    /// Reset pending and errored runs; successful runs are kept.
    ClearInFlight,
    ClearAll,
    CancelRun { run_id: RunId },
}

/// What a dispatch changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueChange {
    pub added: Vec<SuggestionId>,
    /// Suggestions that left the active set, with their final status.
    pub removed: Vec<EditSuggestion>,
    pub progress_changed: Vec<RunId>,
}

impl QueueChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.progress_changed.is_empty()
    }

    fn touch(&mut self, run_id: &RunId) {
        if !self.progress_changed.contains(run_id) {
            self.progress_changed.push(run_id.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    target_file: Option<String>,
    old_span: String,
    new_span: String,
}

impl From<&StructuredEdit> for DedupKey {
    fn from(edit: &StructuredEdit) -> Self {
        Self {
            target_file: edit.target_file.clone(),
            old_span: edit.old_span.clone(),
            new_span: edit.new_span.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cascade {
    /// No step has been counted yet.
    Undecided,
    /// The server reports progress; no client timer runs.
    EventDriven,
    /// Client-side stagger. `None` once every known edit is counted.
    Timer { next_step_at: Option<Instant> },
}

#[derive(Debug, Clone)]
struct RunEntry {
    progress: RunProgress,
    seen: HashSet<DedupKey>,
    started_at: Instant,
    queued: usize,
    tool_count: Option<usize>,
    cascade: Cascade,
    success_at: Option<Instant>,
}

impl RunEntry {
    fn new(now: Instant) -> Self {
        Self {
            progress: RunProgress::pending(),
            seen: HashSet::new(),
            started_at: now,
            queued: 0,
            tool_count: None,
            cascade: Cascade::Undecided,
            success_at: None,
        }
    }

    fn is_pending(&self) -> bool {
        self.progress.state == RunState::Pending
    }

    fn cascade_deadline(&self) -> Option<Instant> {
        match self.cascade {
            Cascade::Timer { next_step_at } => next_step_at,
            Cascade::Undecided | Cascade::EventDriven => None,
        }
    }

    fn deadlines(&self) -> impl Iterator<Item = Instant> {
        self.cascade_deadline().into_iter().chain(self.success_at)
    }

    fn cancel_timers(&mut self) {
        if let Cascade::Timer { next_step_at } = &mut self.cascade {
            *next_step_at = None;
        }
        self.success_at = None;
    }

    fn everything_counted(&self) -> bool {
        let expected = self.progress.expected_count;
        self.progress.completed_count >= expected && (expected > 0 || self.tool_count.is_some())
    }

    fn refresh_expected(&mut self) {
        let expected = self.tool_count.unwrap_or(0).max(self.queued);
        self.progress.expected_count = self.progress.expected_count.max(expected);
    }

    /// Advance the staggered cascade up to `now`.
    fn step_cascade(&mut self, now: Instant, step: Duration) -> bool {
        let Cascade::Timer {
            next_step_at: Some(mut due),
        } = self.cascade
        else {
            return false;
        };
        let before = self.progress.completed_count;
        while due <= now && self.progress.completed_count < self.progress.expected_count {
            self.progress.completed_count += 1;
            due += step;
        }
        let next_step_at = (self.progress.completed_count < self.progress.expected_count).then_some(due);
        self.cascade = Cascade::Timer { next_step_at };
        self.progress.completed_count != before
    }

    /// Enter `success` once everything is counted and the dwell elapsed;
    /// otherwise schedule the transition.
    fn settle(&mut self, now: Instant, min_dwell: Duration) -> bool {
        if !self.is_pending() {
            return false;
        }
        if !self.everything_counted() {
            // More edits arrived after success was scheduled.
            self.success_at = None;
            return false;
        }
        let dwell_end = self.started_at + min_dwell;
        if now >= dwell_end {
            self.progress.state = RunState::Success;
            self.cancel_timers();
            true
        } else {
            self.success_at = Some(dwell_end);
            false
        }
    }
}

/// Pending suggestions plus the run registry.
#[derive(Debug, Clone)]
pub struct ProposalQueue {
    min_dwell: Duration,
    cascade_step: Duration,
    suggestions: Vec<EditSuggestion>,
    runs: IndexMap<RunId, RunEntry>,
}

impl ProposalQueue {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            min_dwell: config.min_dwell,
            cascade_step: config.cascade_step,
            suggestions: Vec::new(),
            runs: IndexMap::new(),
        }
    }

    /// Pending suggestions in arrival order.
    pub fn suggestions(&self) -> &[EditSuggestion] {
        &self.suggestions
    }

    pub fn get(&self, id: SuggestionId) -> Option<&EditSuggestion> {
        self.suggestions.iter().find(|s| s.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }

    pub fn progress(&self, run_id: &RunId) -> Option<&RunProgress> {
        self.runs.get(run_id).map(|entry| &entry.progress)
    }

    pub fn runs(&self) -> impl Iterator<Item = (&RunId, &RunProgress)> {
        self.runs.iter().map(|(id, entry)| (id, &entry.progress))
    }

    /// Earliest pending timer across all runs.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.runs.values().flat_map(RunEntry::deadlines).min()
    }

    pub fn scheduled_timer_count(&self) -> usize {
        self.runs.values().map(|entry| entry.deadlines().count()).sum()
    }

    pub fn dispatch(&mut self, action: QueueAction, now: Instant) -> QueueChange {
        let mut change = QueueChange::default();
        match action {
            QueueAction::StartRun { run_id } => {
                let stale: Vec<RunId> = self.runs.keys().filter(|id| **id != run_id).cloned().collect();
                for id in stale {
                    self.runs.shift_remove(&id);
                    change.touch(&id);
                }
            }
            QueueAction::EditsReceived { run_id, edits } => {
                self.receive_edits(run_id, edits, now, &mut change);
            }
            QueueAction::ToolProgress { run_id, meta } => {
                self.tool_progress(run_id, meta, now, &mut change);
            }
            QueueAction::RunFailed { run_id, message } => match self.runs.get_mut(&run_id) {
                Some(entry) if entry.is_pending() => {
                    entry.progress.state = RunState::Error;
                    entry.progress.error_message = Some(message);
                    entry.cancel_timers();
                    change.touch(&run_id);
                }
                Some(_) => trace!(%run_id, "error after terminal state ignored"),
                None => warn!(%run_id, "error for a run without progress: {message}"),
            },
            QueueAction::MarkAccepted { id } => {
                if let Some(suggestion) = self.take(id, SuggestionStatus::Accepted) {
                    change.removed.push(suggestion);
                }
            }
            QueueAction::Reject { id } => {
                if let Some(suggestion) = self.take(id, SuggestionStatus::Rejected) {
                    change.removed.push(suggestion);
                }
            }
            QueueAction::Revalidate {
                document,
                active_path,
                content,
            } => {
                let (stale, keep): (Vec<_>, Vec<_>) =
                    std::mem::take(&mut self.suggestions).into_iter().partition(|s| {
                        let target = s.edit.target_file.as_deref().or(active_path.as_deref());
                        target == document.as_deref() && !is_applicable(&content, &s.edit)
                    });
                self.suggestions = keep;
                if !stale.is_empty() {
                    debug!(count = stale.len(), ?document, "dropped suggestions that no longer apply");
                }
                change.removed.extend(stale);
            }
            QueueAction::ClearInFlight => {
                let cleared: Vec<RunId> = self
                    .runs
                    .iter()
                    .filter(|(_, entry)| entry.progress.state != RunState::Success)
                    .map(|(id, _)| id.clone())
                    .collect();
                for run_id in &cleared {
                    self.runs.shift_remove(run_id);
                    change.touch(run_id);
                }
                let (removed, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.suggestions)
                    .into_iter()
                    .partition(|s| cleared.contains(&s.source_run_id));
                self.suggestions = keep;
                change.removed.extend(removed);
            }
            QueueAction::ClearAll => {
                change.removed = std::mem::take(&mut self.suggestions);
                change.progress_changed = self.runs.drain(..).map(|(id, _)| id).collect();
            }
            QueueAction::CancelRun { run_id } => {
                if self.runs.shift_remove(&run_id).is_some() {
                    debug!(%run_id, "run cancelled");
                    change.touch(&run_id);
                }
            }
        }
        change
    }

    /// Fire every timer due at `now`. Returns the runs whose progress moved.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<RunId> {
        let mut changed = Vec::new();
        for (run_id, entry) in self.runs.iter_mut() {
            if !entry.is_pending() {
                continue;
            }
            let stepped = entry.step_cascade(now, self.cascade_step);
            let settled = entry.settle(now, self.min_dwell);
            if stepped || settled {
                changed.push(run_id.clone());
            }
        }
        changed
    }

    fn receive_edits(
        &mut self,
        run_id: RunId,
        edits: Vec<ProposedEdit>,
        now: Instant,
        change: &mut QueueChange,
    ) {
        let pending_keys: HashSet<DedupKey> =
            self.suggestions.iter().map(|s| DedupKey::from(&s.edit)).collect();
        let entry = self
            .runs
            .entry(run_id.clone())
            .or_insert_with(|| RunEntry::new(now));

        for proposed in edits {
            let key = DedupKey::from(&proposed.edit);
            if pending_keys.contains(&key) || !entry.seen.insert(key) {
                trace!(%run_id, old_span = %proposed.edit.old_span, "duplicate edit skipped");
                continue;
            }
            let suggestion = EditSuggestion {
                id: SuggestionId::new(),
                source_run_id: run_id.clone(),
                edit: proposed.edit,
                status: SuggestionStatus::Pending,
                derived_start_line: proposed.derived_start_line,
            };
            change.added.push(suggestion.id);
            self.suggestions.push(suggestion);
            entry.queued += 1;
        }
        if change.added.is_empty() || !entry.is_pending() {
            return;
        }

        entry.refresh_expected();
        if entry.cascade == Cascade::Undecided {
            entry.cascade = Cascade::Timer { next_step_at: None };
        }
        if let Cascade::Timer { next_step_at: None } = entry.cascade
            && entry.progress.completed_count < entry.progress.expected_count
        {
            entry.cascade = Cascade::Timer {
                next_step_at: Some(now + self.cascade_step),
            };
        }
        entry.settle(now, self.min_dwell);
        debug!(%run_id, added = change.added.len(), expected = entry.progress.expected_count, "edits queued");
        change.touch(&run_id);
    }

    fn tool_progress(&mut self, run_id: RunId, meta: ToolMeta, now: Instant, change: &mut QueueChange) {
        let edit_related = meta.count.is_some() || meta.progress.is_some() || meta.violations.is_some();
        if !edit_related && !self.runs.contains_key(&run_id) {
            return;
        }
        let entry = self
            .runs
            .entry(run_id.clone())
            .or_insert_with(|| RunEntry::new(now));
        if !entry.is_pending() {
            return;
        }
        if let Some(count) = meta.count {
            entry.tool_count = Some(entry.tool_count.unwrap_or(0).max(count));
            entry.refresh_expected();
        }
        if let Some(violations) = meta.violations {
            entry.progress.violation_count = Some(violations);
        }
        if let Some(progress) = meta.progress {
            // An explicit increment switches the run to event-driven mode for good.
            entry.cascade = Cascade::EventDriven;
            let expected = entry.progress.expected_count.max(progress);
            entry.progress.expected_count = expected;
            entry.progress.completed_count = entry.progress.completed_count.max(progress);
        } else if let Cascade::Timer { next_step_at: None } = entry.cascade
            && entry.progress.completed_count < entry.progress.expected_count
        {
            entry.cascade = Cascade::Timer {
                next_step_at: Some(now + self.cascade_step),
            };
        }
        entry.settle(now, self.min_dwell);
        change.touch(&run_id);
    }

    fn take(&mut self, id: SuggestionId, status: SuggestionStatus) -> Option<EditSuggestion> {
        let index = self.suggestions.iter().position(|s| s.id == id)?;
        let mut suggestion = self.suggestions.remove(index);
        suggestion.status = status;
        Some(suggestion)
    }
}

#[cfg(test)]
mod tests;
