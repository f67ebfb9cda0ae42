//! Client-side review loop for one document context.
//!
//! A [`ReviewSession`] consumes decoded signals for a run, feeds edit batches
//! into the [`ProposalQueue`], fires queue timers and keeps the overlays in
//! sync with the pending suggestions and the active buffer.

use futures::Stream;
use futures::StreamExt;
use livepatch_protocol::RunId;
use livepatch_protocol::RunProgress;
use livepatch_protocol::StreamSignal;
use livepatch_protocol::SuggestionId;
use serde::Serialize;
use tokio::time::Instant;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::annotations::AnnotationRenderer;
use crate::annotations::Overlay;
use crate::annotations::OverlaySink;
use crate::config::PipelineConfig;
use crate::document::ActiveBuffer;
use crate::document::Workspace;
use crate::engine;
use crate::engine::Accepted;
use crate::engine::BatchOutcome;
use crate::engine::Notice;
use crate::error::ApplyError;
use crate::queue::ProposalQueue;
use crate::queue::ProposedEdit;
use crate::queue::QueueAction;

/// How much transcript had been shown when a tool fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolMark {
    pub name: String,
    pub transcript_chars: usize,
}

#[derive(Debug)]
pub struct ReviewSession {
    queue: ProposalQueue,
    renderer: AnnotationRenderer,
    transcript: String,
    tool_marks: Vec<ToolMark>,
    status: Option<String>,
    last_error: Option<String>,
    finished: bool,
    notices: Vec<Notice>,
}

impl ReviewSession {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            queue: ProposalQueue::new(config),
            renderer: AnnotationRenderer::new(config.preview_width),
            transcript: String::new(),
            tool_marks: Vec::new(),
            status: None,
            last_error: None,
            finished: false,
            notices: Vec::new(),
        }
    }

    pub fn queue(&self) -> &ProposalQueue {
        &self.queue
    }

    pub fn progress(&self, run_id: &RunId) -> Option<&RunProgress> {
        self.queue.progress(run_id)
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn tool_marks(&self) -> &[ToolMark] {
        &self.tool_marks
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True once the current run's stream reported `done`.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn overlays(&self) -> &[Overlay] {
        self.renderer.current()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// A new run takes over this context.
    pub fn begin_run(&mut self, run_id: RunId, now: Instant) {
        self.queue.dispatch(QueueAction::StartRun { run_id }, now);
        self.transcript.clear();
        self.tool_marks.clear();
        self.status = None;
        self.last_error = None;
        self.finished = false;
    }

    /// Apply one decoded signal. Returns whether the suggestion set or any
    /// run's progress changed.
    pub fn handle_signal(
        &mut self,
        run_id: &RunId,
        signal: StreamSignal,
        workspace: &Workspace<'_>,
        now: Instant,
    ) -> bool {
        match signal {
            StreamSignal::TextDelta { chunk } => {
                self.transcript.push_str(&chunk);
                false
            }
            StreamSignal::TextSnapshot { full } => {
                self.transcript = full;
                false
            }
            StreamSignal::ToolInvoked { name, meta } => {
                self.tool_marks.push(ToolMark {
                    name,
                    transcript_chars: self.transcript.chars().count(),
                });
                let action = QueueAction::ToolProgress {
                    run_id: run_id.clone(),
                    meta,
                };
                !self.queue.dispatch(action, now).is_empty()
            }
            StreamSignal::EditsReceived { edits } => {
                let edits = edits
                    .into_iter()
                    .map(|edit| ProposedEdit::enrich(edit, |target| workspace.document_content(target)))
                    .collect();
                let action = QueueAction::EditsReceived {
                    run_id: run_id.clone(),
                    edits,
                };
                !self.queue.dispatch(action, now).is_empty()
            }
            StreamSignal::StatusChanged { state } => {
                self.status = Some(state);
                false
            }
            StreamSignal::ErrorOccurred { message } => {
                self.last_error = Some(message.clone());
                let action = QueueAction::RunFailed {
                    run_id: run_id.clone(),
                    message,
                };
                !self.queue.dispatch(action, now).is_empty()
            }
            StreamSignal::Done => {
                self.finished = true;
                false
            }
        }
    }

    pub fn poll_timers(&mut self, now: Instant) -> bool {
        !self.queue.poll_timers(now).is_empty()
    }

    /// Destroy the run's progress and every timer it scheduled.
    pub fn cancel_run(&mut self, run_id: &RunId, now: Instant) {
        self.queue.dispatch(
            QueueAction::CancelRun {
                run_id: run_id.clone(),
            },
            now,
        );
    }

    pub fn clear_in_flight(&mut self, now: Instant) {
        self.queue.dispatch(QueueAction::ClearInFlight, now);
    }

    pub fn clear_all(&mut self, now: Instant) {
        self.queue.dispatch(QueueAction::ClearAll, now);
    }

    pub fn render(&mut self, buffer: &dyn ActiveBuffer, sink: &mut dyn OverlaySink) -> bool {
        self.renderer.recompute(self.queue.suggestions(), buffer, sink)
    }

    pub fn accept(
        &mut self,
        id: SuggestionId,
        workspace: &mut Workspace<'_>,
        sink: &mut dyn OverlaySink,
        now: Instant,
    ) -> Result<Accepted, ApplyError> {
        let result = engine::accept(&mut self.queue, id, workspace, now);
        match &result {
            Ok(accepted) => self.notices.push(accepted.notice()),
            Err(err) => {
                if let Some(suggestion) = self.queue.get(id) {
                    self.notices.push(Notice::failed(suggestion, err));
                }
            }
        }
        self.render(&*workspace.buffer, sink);
        result
    }

    pub fn accept_all(
        &mut self,
        workspace: &mut Workspace<'_>,
        sink: &mut dyn OverlaySink,
        now: Instant,
    ) -> BatchOutcome {
        let outcome = engine::accept_all(&mut self.queue, workspace, now);
        self.notices.extend(outcome.notices());
        self.render(&*workspace.buffer, sink);
        outcome
    }

    pub fn reject(
        &mut self,
        id: SuggestionId,
        buffer: &dyn ActiveBuffer,
        sink: &mut dyn OverlaySink,
        now: Instant,
    ) -> Result<(), ApplyError> {
        engine::reject(&mut self.queue, id, now)?;
        self.render(buffer, sink);
        Ok(())
    }

    /// Run the review loop for `run_id` until the signal stream ends and no
    /// timer is left, or until `cancel` fires.
    pub async fn drive<S>(
        &mut self,
        run_id: RunId,
        mut signals: S,
        workspace: &mut Workspace<'_>,
        sink: &mut dyn OverlaySink,
        cancel: CancellationToken,
    ) where
        S: Stream<Item = StreamSignal> + Unpin,
    {
        self.begin_run(run_id.clone(), Instant::now());
        let mut stream_open = true;

        loop {
            let deadline = self.queue.next_deadline();
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.cancel_run(&run_id, Instant::now());
                    debug!(%run_id, "review cancelled");
                    break;
                }
                signal = signals.next(), if stream_open => match signal {
                    Some(signal) => {
                        self.handle_signal(&run_id, signal, workspace, Instant::now());
                    }
                    None => stream_open = false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.poll_timers(Instant::now());
                }
                else => break,
            }
            self.render(&*workspace.buffer, sink);
        }
        self.render(&*workspace.buffer, sink);
    }
}
