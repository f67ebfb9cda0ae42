//! Domain and wire types for the livepatch streaming patch pipeline.

pub mod edit;
pub mod run;
pub mod signal;
pub mod wire;

pub use edit::EditKind;
pub use edit::EditSuggestion;
pub use edit::StructuredEdit;
pub use edit::SuggestionId;
pub use edit::SuggestionStatus;
pub use run::RunId;
pub use run::RunPermissions;
pub use run::RunProgress;
pub use run::RunState;
pub use run::StepState;
pub use signal::StreamSignal;
pub use wire::Frame;
pub use wire::StreamEventName;
pub use wire::ToolMeta;
