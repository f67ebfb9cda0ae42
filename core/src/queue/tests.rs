use std::time::Duration;

use livepatch_protocol::RunState;
use livepatch_protocol::StepState;
use pretty_assertions::assert_eq;

use super::*;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn queue() -> ProposalQueue {
    let config = PipelineConfig {
        min_dwell: ms(600),
        cascade_step: ms(150),
        ..PipelineConfig::default()
    };
    ProposalQueue::new(&config)
}

fn proposed(old: &str, new: &str) -> ProposedEdit {
    ProposedEdit {
        edit: StructuredEdit::new(old, new),
        derived_start_line: None,
    }
}

fn edits_received(run: &str, edits: Vec<ProposedEdit>) -> QueueAction {
    QueueAction::EditsReceived {
        run_id: RunId::from(run),
        edits,
    }
}

fn tool(run: &str, meta: ToolMeta) -> QueueAction {
    QueueAction::ToolProgress {
        run_id: RunId::from(run),
        meta,
    }
}

fn state(queue: &ProposalQueue, run: &str) -> Option<RunState> {
    queue.progress(&RunId::from(run)).map(|p| p.state)
}

#[test]
fn duplicate_edits_queue_once() {
    let t0 = Instant::now();
    let mut queue = queue();
    let change = queue.dispatch(
        edits_received("r1", vec![proposed("a", "b"), proposed("a", "b")]),
        t0,
    );
    assert_eq!(change.added.len(), 1);

    // The same key from a later batch of the same run or from another run is
    // skipped while the first copy is pending.
    queue.dispatch(edits_received("r1", vec![proposed("a", "b")]), t0);
    queue.dispatch(edits_received("r2", vec![proposed("a", "b")]), t0);
    assert_eq!(queue.suggestions().len(), 1);

    // A different target is a different key.
    let targeted = ProposedEdit {
        edit: StructuredEdit::new("a", "b").with_target("other.md"),
        derived_start_line: None,
    };
    queue.dispatch(edits_received("r1", vec![targeted]), t0);
    assert_eq!(queue.suggestions().len(), 2);
}

#[test]
fn expected_count_is_the_larger_of_tool_count_and_queued_edits() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(
        tool(
            "r1",
            ToolMeta {
                count: Some(3),
                ..Default::default()
            },
        ),
        t0,
    );
    queue.dispatch(edits_received("r1", vec![proposed("a", "b")]), t0);
    assert_eq!(queue.progress(&"r1".into()).map(|p| p.expected_count), Some(3));

    queue.dispatch(
        edits_received(
            "r1",
            vec![proposed("c", "d"), proposed("e", "f"), proposed("g", "h")],
        ),
        t0,
    );
    assert_eq!(queue.progress(&"r1".into()).map(|p| p.expected_count), Some(4));
}

#[test]
fn timer_cascade_steps_then_waits_out_the_dwell() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(
        edits_received("r1", vec![proposed("a", "1"), proposed("b", "2"), proposed("c", "3")]),
        t0,
    );
    assert_eq!(queue.next_deadline(), Some(t0 + ms(150)));

    assert_eq!(queue.poll_timers(t0 + ms(150)), vec![RunId::from("r1")]);
    let progress = queue.progress(&"r1".into()).cloned().expect("progress");
    assert_eq!(progress.completed_count, 1);
    assert_eq!(
        progress.step_states(),
        vec![StepState::Done, StepState::Active, StepState::Queued]
    );

    queue.poll_timers(t0 + ms(460));
    assert_eq!(queue.progress(&"r1".into()).map(|p| p.completed_count), Some(3));
    // Everything is counted but the dwell has not elapsed.
    assert_eq!(state(&queue, "r1"), Some(RunState::Pending));
    assert_eq!(queue.next_deadline(), Some(t0 + ms(600)));
    assert_eq!(queue.scheduled_timer_count(), 1);

    queue.poll_timers(t0 + ms(600));
    assert_eq!(state(&queue, "r1"), Some(RunState::Success));
    assert_eq!(queue.scheduled_timer_count(), 0);
    assert_eq!(queue.next_deadline(), None);
}

#[test]
fn event_driven_progress_disables_the_timer_and_still_honors_the_dwell() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(edits_received("r1", vec![proposed("a", "1"), proposed("b", "2")]), t0);
    queue.dispatch(
        tool(
            "r1",
            ToolMeta {
                progress: Some(1),
                ..Default::default()
            },
        ),
        t0 + ms(5),
    );
    // Only event-driven increments from now on.
    assert_eq!(queue.next_deadline(), None);
    assert_eq!(queue.poll_timers(t0 + ms(400)), Vec::<RunId>::new());
    assert_eq!(queue.progress(&"r1".into()).map(|p| p.completed_count), Some(1));

    queue.dispatch(
        tool(
            "r1",
            ToolMeta {
                progress: Some(2),
                ..Default::default()
            },
        ),
        t0 + ms(10),
    );
    assert_eq!(state(&queue, "r1"), Some(RunState::Pending));
    assert_eq!(queue.next_deadline(), Some(t0 + ms(600)));

    queue.poll_timers(t0 + ms(599));
    assert_eq!(state(&queue, "r1"), Some(RunState::Pending));
    queue.poll_timers(t0 + ms(600));
    assert_eq!(state(&queue, "r1"), Some(RunState::Success));
}

#[test]
fn late_edits_postpone_a_scheduled_success() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(edits_received("r1", vec![proposed("a", "1")]), t0);
    queue.poll_timers(t0 + ms(150));
    assert_eq!(queue.next_deadline(), Some(t0 + ms(600)));

    queue.dispatch(edits_received("r1", vec![proposed("b", "2")]), t0 + ms(200));
    assert_eq!(queue.next_deadline(), Some(t0 + ms(350)));
    queue.poll_timers(t0 + ms(600));
    assert_eq!(state(&queue, "r1"), Some(RunState::Success));
    assert_eq!(queue.progress(&"r1".into()).map(|p| p.completed_count), Some(2));
}

#[test]
fn violations_only_runs_finish() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(
        tool(
            "r1",
            ToolMeta {
                count: Some(0),
                violations: Some(2),
                ..Default::default()
            },
        ),
        t0,
    );
    assert_eq!(
        queue.progress(&"r1".into()).and_then(|p| p.violation_count),
        Some(2)
    );
    queue.poll_timers(t0 + ms(600));
    assert_eq!(state(&queue, "r1"), Some(RunState::Success));
}

#[test]
fn errors_are_terminal_and_cancel_timers() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(edits_received("r1", vec![proposed("a", "1")]), t0);
    queue.dispatch(
        QueueAction::RunFailed {
            run_id: "r1".into(),
            message: "quota exhausted".to_string(),
        },
        t0 + ms(10),
    );
    let progress = queue.progress(&"r1".into()).cloned().expect("progress");
    assert_eq!(progress.state, RunState::Error);
    assert_eq!(progress.error_message.as_deref(), Some("quota exhausted"));
    assert_eq!(queue.scheduled_timer_count(), 0);

    queue.poll_timers(t0 + ms(1_000));
    assert_eq!(state(&queue, "r1"), Some(RunState::Error));
}

#[test]
fn errors_for_unknown_runs_create_no_state() {
    let mut queue = queue();
    let change = queue.dispatch(
        QueueAction::RunFailed {
            run_id: "ghost".into(),
            message: "boom".to_string(),
        },
        Instant::now(),
    );
    assert!(change.is_empty());
    assert_eq!(queue.runs().count(), 0);
}

#[test]
fn clear_in_flight_keeps_successful_runs() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(edits_received("done", vec![proposed("a", "1")]), t0);
    queue.poll_timers(t0 + ms(600));
    assert_eq!(state(&queue, "done"), Some(RunState::Success));

    let t1 = t0 + ms(700);
    queue.dispatch(edits_received("busy", vec![proposed("b", "2")]), t1);
    queue.dispatch(edits_received("failed", vec![proposed("c", "3")]), t1);
    queue.dispatch(
        QueueAction::RunFailed {
            run_id: "failed".into(),
            message: "x".to_string(),
        },
        t1,
    );
    assert!(queue.scheduled_timer_count() > 0);

    let change = queue.dispatch(QueueAction::ClearInFlight, t1);
    assert_eq!(change.removed.len(), 2);
    assert_eq!(queue.scheduled_timer_count(), 0);
    assert_eq!(state(&queue, "done"), Some(RunState::Success));
    assert_eq!(state(&queue, "busy"), None);
    assert_eq!(state(&queue, "failed"), None);
    assert_eq!(queue.suggestions().len(), 1);
}

#[test]
fn clear_all_and_cancel_leave_no_timers() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(edits_received("r1", vec![proposed("a", "1")]), t0);
    queue.dispatch(edits_received("r2", vec![proposed("b", "2")]), t0);
    assert_eq!(queue.scheduled_timer_count(), 2);

    queue.dispatch(QueueAction::CancelRun { run_id: "r1".into() }, t0);
    assert_eq!(state(&queue, "r1"), None);
    assert_eq!(queue.scheduled_timer_count(), 1);
    // Cancelling twice is a no-op.
    assert!(queue.dispatch(QueueAction::CancelRun { run_id: "r1".into() }, t0).is_empty());

    queue.dispatch(QueueAction::ClearAll, t0);
    assert_eq!(queue.scheduled_timer_count(), 0);
    assert!(queue.is_empty());
}

#[test]
fn starting_a_run_drops_other_runs_progress() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(edits_received("old", vec![proposed("a", "1")]), t0);
    queue.dispatch(QueueAction::StartRun { run_id: "new".into() }, t0);
    assert_eq!(state(&queue, "old"), None);
    assert_eq!(state(&queue, "new"), None);
    assert_eq!(queue.suggestions().len(), 1);
    assert_eq!(queue.scheduled_timer_count(), 0);
}

#[test]
fn the_dwell_counts_from_the_first_edit_not_the_start_of_the_run() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(QueueAction::StartRun { run_id: "r1".into() }, t0);
    assert_eq!(queue.next_deadline(), None);

    let t1 = t0 + ms(2_000);
    queue.dispatch(edits_received("r1", vec![proposed("a", "1")]), t1);
    queue.poll_timers(t1 + ms(150));
    assert_eq!(queue.progress(&"r1".into()).map(|p| p.completed_count), Some(1));
    assert_eq!(state(&queue, "r1"), Some(RunState::Pending));

    queue.poll_timers(t1 + ms(600));
    assert_eq!(state(&queue, "r1"), Some(RunState::Success));
}

#[test]
fn runs_without_edit_signals_never_report_progress() {
    let t0 = Instant::now();
    let mut queue = queue();
    queue.dispatch(QueueAction::StartRun { run_id: "chat".into() }, t0);
    assert!(queue.poll_timers(t0 + ms(60_000)).is_empty());
    assert_eq!(state(&queue, "chat"), None);
    assert_eq!(queue.runs().count(), 0);

    // A tool that is not about edits does not start progress either.
    queue.dispatch(tool("chat", ToolMeta::default()), t0);
    assert_eq!(state(&queue, "chat"), None);
}

#[test]
fn accept_and_reject_remove_suggestions() {
    let t0 = Instant::now();
    let mut queue = queue();
    let change = queue.dispatch(edits_received("r1", vec![proposed("a", "1"), proposed("b", "2")]), t0);
    let (first, second) = (change.added[0], change.added[1]);

    let accepted = queue.dispatch(QueueAction::MarkAccepted { id: first }, t0);
    assert_eq!(accepted.removed[0].status, SuggestionStatus::Accepted);
    let rejected = queue.dispatch(QueueAction::Reject { id: second }, t0);
    assert_eq!(rejected.removed[0].status, SuggestionStatus::Rejected);
    assert!(queue.is_empty());

    // Unknown ids change nothing.
    assert!(queue.dispatch(QueueAction::Reject { id: first }, t0).is_empty());
}

#[test]
fn revalidation_only_touches_the_named_document() {
    let t0 = Instant::now();
    let mut queue = queue();
    let side = ProposedEdit {
        edit: StructuredEdit::new("gone", "x").with_target("side.md"),
        derived_start_line: None,
    };
    queue.dispatch(
        edits_received("r1", vec![proposed("gone", "y"), proposed("kept", "z"), side]),
        t0,
    );

    let change = queue.dispatch(
        QueueAction::Revalidate {
            document: Some("main.md".to_string()),
            active_path: Some("main.md".to_string()),
            content: "kept text".to_string(),
        },
        t0,
    );
    assert_eq!(change.removed.len(), 1);
    assert_eq!(change.removed[0].edit, StructuredEdit::new("gone", "y"));
    let remaining: Vec<&str> = queue
        .suggestions()
        .iter()
        .map(|s| s.edit.old_span.as_str())
        .collect();
    assert_eq!(remaining, vec!["kept", "gone"]);
}

#[test]
fn enrichment_prefers_hints_then_searches() {
    let content = |target: Option<&str>| match target {
        Some("side.md") => Some("one\ntwo\nthree\n".to_string()),
        Some(_) => None,
        None => Some("alpha\nbeta\n".to_string()),
    };

    let hinted = StructuredEdit {
        start_line: Some(7),
        ..StructuredEdit::new("beta", "b")
    };
    assert_eq!(ProposedEdit::enrich(hinted, content).derived_start_line, Some(7));
    assert_eq!(
        ProposedEdit::enrich(StructuredEdit::new("three", "3").with_target("side.md"), content)
            .derived_start_line,
        Some(3)
    );
    // Unknown targets fall back to the active buffer.
    assert_eq!(
        ProposedEdit::enrich(StructuredEdit::new("beta", "b").with_target("missing.md"), content)
            .derived_start_line,
        Some(2)
    );
    assert_eq!(
        ProposedEdit::enrich(StructuredEdit::new("nowhere", "x"), content).derived_start_line,
        None
    );
}
