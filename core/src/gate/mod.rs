//! Server-side policy filter over the edits an agent run proposes.
//!
//! The gate classifies each proposed edit and drops the ones whose operation
//! the run is not permitted to perform. It never reads document content; line
//! translation of raw payloads goes through a caller-supplied translator.

mod translate;

use std::fmt;

use livepatch_protocol::EditKind;
use livepatch_protocol::Frame;
use livepatch_protocol::RunPermissions;
use livepatch_protocol::StreamEventName;
use livepatch_protocol::StructuredEdit;
use livepatch_protocol::ToolMeta;
use livepatch_protocol::wire::EditsPayload;
use livepatch_protocol::wire::ToolEvent;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::info;

pub use translate::DocumentTranslator;
pub use translate::EditTranslator;
pub use translate::LineOp;
pub use translate::TranslateError;
pub use translate::ValidatedEdit;
pub use translate::translate;

/// Name reported in the `tool` frame the gate emits.
pub const PROPOSE_EDITS_TOOL: &str = "propose_edits";

/// One edit the gate refused to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentViolation {
    /// Position of the edit in the proposed batch.
    pub index: usize,
    /// `None` when the payload never validated into an operation.
    pub kind: Option<EditKind>,
    pub reason: String,
}

impl fmt::Display for IntentViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edit {}: {}", self.index + 1, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateReport {
    pub accepted: Vec<StructuredEdit>,
    pub violations: Vec<IntentViolation>,
}

impl GateReport {
    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }

    pub fn tool_meta(&self) -> ToolMeta {
        ToolMeta {
            count: Some(self.accepted.len()),
            progress: None,
            violations: Some(self.violation_count()),
            reasons: self.reasons(),
        }
    }

    /// The `tool` frame followed by the `edits` frame (omitted when nothing
    /// was accepted).
    pub fn frames(&self) -> serde_json::Result<Vec<Frame>> {
        let mut frames = vec![Frame::json(
            StreamEventName::Tool,
            &ToolEvent {
                name: PROPOSE_EDITS_TOOL.to_string(),
                meta: self.tool_meta(),
            },
        )?];
        if !self.accepted.is_empty() {
            frames.push(Frame::json(
                StreamEventName::Edits,
                &EditsPayload::Wrapped {
                    edits: self.accepted.clone(),
                },
            )?);
        }
        Ok(frames)
    }
}

/// "Is this principal allowed to generate another edit run".
pub trait EditRunAuthorizer {
    /// `Err` carries the user-facing denial message.
    fn authorize(&self, principal: &str) -> Result<(), String>;
}

/// Authorizer that never denies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unmetered;

impl EditRunAuthorizer for Unmetered {
    fn authorize(&self, _principal: &str) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    message: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentGate {
    permissions: RunPermissions,
    /// Target assigned to edits that do not name one.
    default_target: Option<String>,
}

impl IntentGate {
    pub fn new(permissions: RunPermissions) -> Self {
        Self {
            permissions,
            default_target: None,
        }
    }

    /// Gate configured from the user's request text.
    pub fn for_request(request: &str) -> Self {
        Self::new(RunPermissions::infer_from_request(request))
    }

    pub fn with_default_target(mut self, target: Option<String>) -> Self {
        self.default_target = target;
        self
    }

    pub fn permissions(&self) -> RunPermissions {
        self.permissions
    }

    pub fn screen(&self, edits: Vec<StructuredEdit>) -> GateReport {
        let mut report = GateReport::default();
        for (index, edit) in edits.into_iter().enumerate() {
            match self.check(index, edit.kind()) {
                Ok(()) => report.accepted.push(self.tag(edit)),
                Err(violation) => report.violations.push(violation),
            }
        }
        self.log(&report);
        report
    }

    /// Validate and permission-check raw line-addressed payloads, then hand
    /// the permitted ones to `translator`. The permission check runs on the
    /// declared `editType`; the shape of the translated spans never counts.
    pub fn screen_raw(&self, raw: &[Value], translator: &dyn EditTranslator) -> GateReport {
        let mut report = GateReport::default();
        for (index, value) in raw.iter().enumerate() {
            let validated = match ValidatedEdit::from_value(value) {
                Ok(validated) => validated,
                Err(reason) => {
                    report.violations.push(IntentViolation {
                        index,
                        kind: None,
                        reason: format!("malformed: {reason}"),
                    });
                    continue;
                }
            };
            let kind = validated.op.kind();
            if let Err(violation) = self.check(index, kind) {
                report.violations.push(violation);
                continue;
            }

            let target = validated
                .target_file
                .clone()
                .or_else(|| self.default_target.clone());
            match translator.translate_edit(&validated, target.as_deref()) {
                Ok(edit) => report.accepted.push(self.tag(edit)),
                Err(err) => report.violations.push(IntentViolation {
                    index,
                    kind: Some(kind),
                    reason: format!("untranslatable: {err}"),
                }),
            }
        }
        self.log(&report);
        report
    }

    /// Frames for one run: an `error` frame when `authorizer` denies the
    /// principal, otherwise the screened report's frames.
    pub fn run_frames(
        &self,
        authorizer: &dyn EditRunAuthorizer,
        principal: &str,
        edits: Vec<StructuredEdit>,
    ) -> serde_json::Result<Vec<Frame>> {
        if let Err(message) = authorizer.authorize(principal) {
            info!(principal, "edit run denied: {message}");
            return Ok(vec![Frame::json(
                StreamEventName::Error,
                &ErrorPayload { message: &message },
            )?]);
        }
        self.screen(edits).frames()
    }

    fn check(&self, index: usize, kind: EditKind) -> Result<(), IntentViolation> {
        if self.permissions.allows(kind) {
            Ok(())
        } else {
            Err(IntentViolation {
                index,
                kind: Some(kind),
                reason: format!("{kind} edits are not permitted for this request"),
            })
        }
    }

    fn tag(&self, mut edit: StructuredEdit) -> StructuredEdit {
        if edit.target_file.is_none() {
            edit.target_file = self.default_target.clone();
        }
        edit
    }

    fn log(&self, report: &GateReport) {
        debug!(
            accepted = report.accepted.len(),
            violations = report.violation_count(),
            permissions = ?self.permissions,
            "screened proposed edits"
        );
    }
}
