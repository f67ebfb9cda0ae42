//! End-to-end: gate on the producing side, framed bytes in between, decoder,
//! review session and batch application on the consuming side.

use std::io::Cursor;

use livepatch_core::IntentGate;
use livepatch_core::PipelineConfig;
use livepatch_core::ReviewSession;
use livepatch_core::Workspace;
use livepatch_core::annotations::RecordingSink;
use livepatch_core::decoder::decode_reader;
use livepatch_core::document::ActiveBuffer;
use livepatch_core::document::DocumentStore;
use livepatch_core::document::MemoryBuffer;
use livepatch_core::document::MemoryDocumentStore;
use livepatch_core::gate::EditRunAuthorizer;
use livepatch_protocol::Frame;
use livepatch_protocol::RunId;
use livepatch_protocol::RunState;
use livepatch_protocol::StreamEventName;
use livepatch_protocol::StructuredEdit;
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn transcript(frames: Vec<Frame>) -> Vec<u8> {
    let mut out = Frame::new(StreamEventName::AssistantPartial, "Fixing typos").encode();
    for frame in frames {
        out.push_str(&frame.encode());
    }
    out.push_str(&Frame::new(StreamEventName::Done, "{}").encode());
    out.into_bytes()
}

#[tokio::test(start_paused = true)]
async fn gated_edits_flow_through_to_the_documents() {
    let config = PipelineConfig::default();
    let gate = IntentGate::for_request("fix the typos").with_default_target(Some("main.md".into()));
    let report = gate.screen(vec![
        StructuredEdit::new("teh", "the"),
        StructuredEdit::new("recieve", "receive").with_target("notes.md"),
        StructuredEdit::new("junk\n", ""),
    ]);
    assert_eq!(report.violation_count(), 1);
    let bytes = transcript(report.frames().expect("encode frames"));

    let cancel = CancellationToken::new();
    let signals = decode_reader(Cursor::new(bytes), &config, cancel.clone());

    let mut buffer = MemoryBuffer::new(Some("main.md"), "teh cat\njunk\n");
    let mut store = MemoryDocumentStore::new().with_document("notes.md", "we recieve mail\n");
    let mut sink = RecordingSink::default();
    let mut session = ReviewSession::new(&config);
    let run_id = RunId::from("run-1");

    let mut workspace = Workspace::new(&mut buffer, &mut store);
    session
        .drive(run_id.clone(), signals, &mut workspace, &mut sink, cancel)
        .await;

    let progress = session.progress(&run_id).cloned().expect("progress");
    assert_eq!(progress.state, RunState::Success);
    assert_eq!(progress.expected_count, 2);
    assert_eq!(progress.violation_count, Some(1));
    assert_eq!(session.transcript(), "Fixing typos");
    assert_eq!(session.tool_marks().len(), 1);
    assert_eq!(session.tool_marks()[0].transcript_chars, "Fixing typos".len());
    assert_eq!(session.queue().scheduled_timer_count(), 0);
    assert_eq!(sink.current().len(), 2);

    let outcome = session.accept_all(&mut workspace, &mut sink, Instant::now());
    assert_eq!(outcome.applied.len(), 2);
    assert!(outcome.failures.is_empty());
    assert_eq!(workspace.buffer.text(), "the cat\njunk\n");
    assert_eq!(
        workspace.store.content("notes.md").as_deref(),
        Some("we receive mail\n")
    );
    assert!(session.overlays().is_empty());
    assert!(session.queue().is_empty());
}

struct Exhausted;

impl EditRunAuthorizer for Exhausted {
    fn authorize(&self, _principal: &str) -> Result<(), String> {
        Err("edit quota exhausted".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn denied_runs_surface_as_errors() {
    let config = PipelineConfig::default();
    let gate = IntentGate::for_request("rewrite the intro");
    let frames = gate
        .run_frames(&Exhausted, "user-7", vec![StructuredEdit::new("a", "b")])
        .expect("frames");
    let cancel = CancellationToken::new();
    let signals = decode_reader(Cursor::new(transcript(frames)), &config, cancel.clone());

    let mut buffer = MemoryBuffer::new(None, "a\n");
    let mut store = MemoryDocumentStore::new();
    let mut sink = RecordingSink::default();
    let mut session = ReviewSession::new(&config);
    let run_id = RunId::from("run-2");

    let mut workspace = Workspace::new(&mut buffer, &mut store);
    session
        .drive(run_id.clone(), signals, &mut workspace, &mut sink, cancel)
        .await;

    assert_eq!(session.last_error(), Some("edit quota exhausted"));
    // No edit signal ever arrived, so the run never gained progress.
    assert_eq!(session.progress(&run_id), None);
    assert!(session.queue().is_empty());
    assert!(session.is_finished());
}
