//! Streaming patch pipeline: decode an agent's framed response stream, queue
//! the structured edits it proposes, render them as overlays and apply the
//! ones the user accepts.

// Prevent accidental direct writes to stdout/stderr in library code.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod annotations;
pub mod config;
pub mod decoder;
pub mod document;
pub mod engine;
pub mod error;
pub mod gate;
pub mod patch;
pub mod queue;
pub mod session;

pub use annotations::AnnotationRenderer;
pub use annotations::Overlay;
pub use annotations::OverlaySink;
pub use config::PipelineConfig;
pub use decoder::SignalStream;
pub use document::ActiveBuffer;
pub use document::DocumentStore;
pub use document::Workspace;
pub use error::LivepatchErr;
pub use error::Result;
pub use gate::IntentGate;
pub use queue::ProposalQueue;
pub use session::ReviewSession;
