//! Rendering of a finished replay, either for a human or as JSONL.

use livepatch_core::Overlay;
use livepatch_core::session::ToolMark;
use livepatch_protocol::EditSuggestion;
use livepatch_protocol::RunId;
use livepatch_protocol::RunProgress;
use livepatch_protocol::StepState;
use serde::Serialize;
use serde_json::json;

/// Everything a replay observed, captured after the review loop returned.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub run_id: RunId,
    pub transcript: String,
    pub tool_marks: Vec<ToolMark>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub finished: bool,
    pub progress: Option<RunProgress>,
    /// Suggestions still pending after the run (and after accept-all).
    pub suggestions: Vec<EditSuggestion>,
    pub overlays: Vec<Overlay>,
    pub notices: Vec<String>,
}

pub trait ReportFormatter {
    fn format(&self, report: &ReplayReport) -> Vec<String>;
}

pub struct HumanOutput;

pub struct JsonlOutput;

impl ReportFormatter for HumanOutput {
    fn format(&self, report: &ReplayReport) -> Vec<String> {
        let mut lines = Vec::new();
        if !report.transcript.is_empty() {
            lines.push(report.transcript.clone());
            lines.push(String::new());
        }
        for mark in &report.tool_marks {
            lines.push(format!("tool {} (after {} chars)", mark.name, mark.transcript_chars));
        }
        match &report.progress {
            Some(progress) => lines.push(format!(
                "run {}: {} {}",
                report.run_id,
                progress_summary(progress),
                step_bar(&progress.step_states()),
            )),
            None => lines.push(format!("run {}: no edits proposed", report.run_id)),
        }
        for suggestion in &report.suggestions {
            lines.push(format!(
                "  [{}] {}: {}",
                suggestion.status,
                location(suggestion),
                change(suggestion),
            ));
        }
        lines.extend(report.notices.iter().cloned());
        if let Some(error) = &report.error {
            lines.push(format!("error: {error}"));
        }
        lines
    }
}

impl ReportFormatter for JsonlOutput {
    fn format(&self, report: &ReplayReport) -> Vec<String> {
        let mut events = vec![json!({
            "type": "transcript",
            "runId": report.run_id,
            "text": report.transcript,
            "finished": report.finished,
            "status": report.status,
        })];
        events.extend(
            report
                .tool_marks
                .iter()
                .map(|mark| json!({ "type": "tool", "mark": mark })),
        );
        if let Some(progress) = &report.progress {
            events.push(json!({ "type": "progress", "progress": progress }));
        }
        events.extend(
            report
                .suggestions
                .iter()
                .map(|suggestion| json!({ "type": "suggestion", "suggestion": suggestion })),
        );
        if !report.overlays.is_empty() {
            events.push(json!({ "type": "overlays", "overlays": report.overlays }));
        }
        events.extend(
            report
                .notices
                .iter()
                .map(|notice| json!({ "type": "notice", "message": notice })),
        );
        if let Some(error) = &report.error {
            events.push(json!({ "type": "error", "message": error }));
        }
        events.iter().map(ToString::to_string).collect()
    }
}

fn progress_summary(progress: &RunProgress) -> String {
    let mut out = format!(
        "{} ({}/{} edits",
        progress.state, progress.completed_count, progress.expected_count
    );
    match progress.violation_count {
        Some(1) => out.push_str(", 1 violation"),
        Some(n) if n > 0 => out.push_str(&format!(", {n} violations")),
        _ => {}
    }
    out.push(')');
    out
}

fn step_bar(steps: &[StepState]) -> String {
    steps
        .iter()
        .map(|step| match step {
            StepState::Done => '#',
            StepState::Active => '>',
            StepState::Queued => '.',
        })
        .collect()
}

fn location(suggestion: &EditSuggestion) -> String {
    let file = suggestion
        .edit
        .target_file
        .as_deref()
        .unwrap_or("<active>");
    match suggestion.derived_start_line {
        Some(line) => format!("{file}:{line}"),
        None => file.to_string(),
    }
}

fn change(suggestion: &EditSuggestion) -> String {
    let edit = &suggestion.edit;
    match (edit.old_span.is_empty(), edit.new_span.is_empty()) {
        (true, _) => format!("append {:?}", edit.new_span),
        (false, true) => format!("delete {:?}", edit.old_span),
        (false, false) => format!("{:?} -> {:?}", edit.old_span, edit.new_span),
    }
}
