// - In the default output mode, it is paramount that the only thing written to
//   stdout is the final report or the encoded frames. Diagnostics go through
//   tracing to stderr.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod cli;
pub mod fs_store;
pub mod output;

use std::io::IsTerminal;
use std::path::Path;

use anyhow::Context;
use livepatch_core::DocumentStore;
use livepatch_core::IntentGate;
use livepatch_core::PipelineConfig;
use livepatch_core::ReviewSession;
use livepatch_core::Workspace;
use livepatch_core::annotations::RecordingSink;
use livepatch_core::config::CONFIG_TOML_FILE;
use livepatch_core::config::TomlValue;
use livepatch_core::gate::DocumentTranslator;
use livepatch_core::decoder::decode_reader;
use livepatch_core::document::ActiveBuffer;
use livepatch_core::document::MemoryBuffer;
use livepatch_protocol::Frame;
use livepatch_protocol::RunId;
use livepatch_protocol::StreamEventName;
use livepatch_protocol::StructuredEdit;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::cli::Color;
use crate::cli::Command;
use crate::cli::GateArgs;
use crate::cli::ReplayArgs;
use crate::fs_store::FsDocumentStore;
use crate::output::HumanOutput;
use crate::output::JsonlOutput;
use crate::output::ReplayReport;
use crate::output::ReportFormatter;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let stderr_with_ansi = match cli.color {
        Color::Always => true,
        Color::Never => false,
        Color::Auto => std::io::stderr().is_terminal(),
    };

    let default_level = "error";
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(stderr_with_ansi)
        .with_writer(std::io::stderr)
        .try_init();

    let overrides = cli.parse_overrides()?;

    match &cli.command {
        Command::Replay(args) => {
            let config_path = cli
                .config_file
                .clone()
                .unwrap_or_else(|| args.root.join(CONFIG_TOML_FILE));
            let config = load_config(&config_path, overrides)?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted; cancelling replay");
                    on_interrupt.cancel();
                }
            });

            let report = replay(args, &config, cancel).await?;
            let lines = if args.json {
                JsonlOutput.format(&report)
            } else {
                HumanOutput.format(&report)
            };
            print_lines(&lines);
        }
        Command::Gate(args) => {
            let frames = gate(args)?;
            let encoded: Vec<String> = frames.iter().map(Frame::encode).collect();
            print_lines(&[encoded.concat()]);
        }
    }
    Ok(())
}

fn load_config(
    path: &Path,
    overrides: Vec<(String, TomlValue)>,
) -> anyhow::Result<PipelineConfig> {
    let config = PipelineConfig::load_with_overrides(Some(path), overrides)
        .context("failed to load livepatch config")?;
    debug!(?config, "pipeline config resolved");
    Ok(config)
}

#[allow(clippy::print_stdout)]
fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

/// Decode a recorded stream, review the run it describes and optionally
/// accept every pending suggestion. Accepted edits to the active document are
/// written back to disk.
pub async fn replay(
    args: &ReplayArgs,
    config: &PipelineConfig,
    cancel: CancellationToken,
) -> anyhow::Result<ReplayReport> {
    let mut store = FsDocumentStore::new(&args.root);
    let text = match args.active.as_deref() {
        Some(path) => store.content(path).with_context(|| {
            format!(
                "active document {path} not found under {}",
                args.root.display()
            )
        })?,
        None => String::new(),
    };
    let mut buffer = MemoryBuffer::new(args.active.as_deref(), text);

    let transcript = tokio::fs::File::open(&args.transcript)
        .await
        .with_context(|| format!("failed to open {}", args.transcript.display()))?;
    let signals = decode_reader(transcript, config, cancel.clone());

    let run_id = RunId::new(args.run_id.clone());
    let mut session = ReviewSession::new(config);
    let mut sink = RecordingSink::default();
    {
        let mut workspace = Workspace::new(&mut buffer, &mut store);
        session
            .drive(run_id.clone(), signals, &mut workspace, &mut sink, cancel)
            .await;
        if args.accept_all {
            let outcome = session.accept_all(&mut workspace, &mut sink, Instant::now());
            info!(
                applied = outcome.applied.len(),
                failed = outcome.failures.len(),
                "accept-all finished"
            );
        }
    }

    if let Some(path) = args.active.as_deref()
        && buffer.undo_depth() > 0
    {
        store
            .write(path, buffer.text().to_string())
            .with_context(|| format!("failed to save {path}"))?;
    }

    Ok(ReplayReport {
        transcript: session.transcript().to_string(),
        tool_marks: session.tool_marks().to_vec(),
        status: session.status().map(ToString::to_string),
        error: session.last_error().map(ToString::to_string),
        finished: session.is_finished(),
        progress: session.progress(&run_id).cloned(),
        suggestions: session.queue().suggestions().to_vec(),
        overlays: session.overlays().to_vec(),
        notices: session
            .take_notices()
            .iter()
            .map(ToString::to_string)
            .collect(),
        run_id,
    })
}

/// Screen a batch of edits and return the frames a run would stream for it,
/// terminated by `done`. Line-addressed edits (those carrying `editType`) are
/// translated against the documents under `--root`.
pub fn gate(args: &GateArgs) -> anyhow::Result<Vec<Frame>> {
    let raw = std::fs::read_to_string(&args.edits)
        .with_context(|| format!("failed to read {}", args.edits.display()))?;
    let values: Vec<Value> =
        serde_json::from_str(&raw).context("edits must be a JSON array of objects")?;

    let gate =
        IntentGate::for_request(&args.request).with_default_target(args.current_file.clone());
    let report = if values.iter().any(|value| value.get("editType").is_some()) {
        let store = args.root.as_ref().map(FsDocumentStore::new);
        let translator = DocumentTranslator::new(|target: Option<&str>| {
            let store = store.as_ref()?;
            store.content(target?)
        });
        gate.screen_raw(&values, &translator)
    } else {
        let edits = values
            .into_iter()
            .map(serde_json::from_value::<StructuredEdit>)
            .collect::<Result<Vec<_>, _>>()
            .context("malformed span edit")?;
        gate.screen(edits)
    };

    let mut frames = report.frames()?;
    frames.push(Frame::new(StreamEventName::Done, "{}"));
    Ok(frames)
}
