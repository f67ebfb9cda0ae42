//! Line-addressed operations and their translation into exact-match edits.

use livepatch_protocol::EditKind;
use livepatch_protocol::StructuredEdit;
use livepatch_protocol::wire::RawEdit;
use livepatch_protocol::wire::RawEditType;
use serde_json::Value;
use thiserror::Error;

use crate::patch::Located;
use crate::patch::locate;
use crate::patch::normalize_line_endings;

/// A raw edit that passed boundary validation. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOp {
    Insert { line: usize, content: String },
    Delete { line: usize, count: usize },
    Replace { line: usize, count: usize, content: String },
}

impl LineOp {
    pub fn kind(&self) -> EditKind {
        match self {
            LineOp::Insert { .. } => EditKind::Insert,
            LineOp::Delete { .. } => EditKind::Delete,
            LineOp::Replace { .. } => EditKind::Replace,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            LineOp::Insert { line, .. } | LineOp::Delete { line, .. } | LineOp::Replace { line, .. } => {
                *line
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEdit {
    pub op: LineOp,
    pub explanation: Option<String>,
    pub target_file: Option<String>,
}

impl ValidatedEdit {
    /// Validate a wire payload into a closed operation. The error is a short
    /// human-readable reason.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let raw: RawEdit = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawEdit> for ValidatedEdit {
    type Error = String;

    fn try_from(raw: RawEdit) -> Result<Self, Self::Error> {
        let line = raw.position.line;
        if line == 0 {
            return Err("line numbers start at 1".to_string());
        }
        if raw.original_line_count == Some(0) {
            return Err("originalLineCount must be at least 1".to_string());
        }
        let op = match raw.edit_type {
            RawEditType::Insert => LineOp::Insert {
                line,
                content: raw.content.ok_or("insert requires content")?,
            },
            RawEditType::Delete => LineOp::Delete {
                line,
                count: raw
                    .original_line_count
                    .ok_or("delete requires originalLineCount")?,
            },
            RawEditType::Replace => LineOp::Replace {
                line,
                count: raw.original_line_count.unwrap_or(1),
                content: raw.content.ok_or("replace requires content")?,
            },
        };
        Ok(Self {
            op,
            explanation: raw.explanation,
            target_file: raw.target_file,
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("lines {start}..{end} are outside a document of {total} lines")]
    LineOutOfRange { start: usize, end: usize, total: usize },

    #[error("no unique anchor around line {line}")]
    NotUnique { line: usize },

    #[error("document unavailable: {0}")]
    DocumentUnavailable(String),
}

/// Turns a validated line-addressed edit into an exact-match edit. The gate
/// hands translation to one of these and never reads documents itself.
pub trait EditTranslator {
    /// `target` is the edit's target after defaulting; `None` means the
    /// active document.
    fn translate_edit(
        &self,
        edit: &ValidatedEdit,
        target: Option<&str>,
    ) -> Result<StructuredEdit, TranslateError>;
}

/// [`EditTranslator`] that resolves the target's text through a lookup and
/// runs [`translate`] against it.
pub struct DocumentTranslator<F> {
    content_of: F,
}

impl<F> DocumentTranslator<F>
where
    F: Fn(Option<&str>) -> Option<String>,
{
    pub fn new(content_of: F) -> Self {
        Self { content_of }
    }
}

impl<F> EditTranslator for DocumentTranslator<F>
where
    F: Fn(Option<&str>) -> Option<String>,
{
    fn translate_edit(
        &self,
        edit: &ValidatedEdit,
        target: Option<&str>,
    ) -> Result<StructuredEdit, TranslateError> {
        let content = (self.content_of)(target).ok_or_else(|| {
            TranslateError::DocumentUnavailable(target.unwrap_or("<active document>").to_string())
        })?;
        translate(edit, &content)
    }
}

/// Convert `edit` into an exact-match [`StructuredEdit`] against `content`.
///
/// Line arithmetic runs on `\n`-normalized text. When `content` uses CRLF
/// the produced spans are converted back so they match the stored bytes.
pub fn translate(edit: &ValidatedEdit, content: &str) -> Result<StructuredEdit, TranslateError> {
    let had_crlf = content.contains("\r\n");
    let text = normalize_line_endings(content);
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let total = lines.len();

    let (start, end, replacement) = match &edit.op {
        LineOp::Insert { line, content } => {
            let mut block = terminated(content);
            if *line > total {
                // Past the end: append, keeping the new block on its own line.
                if !text.is_empty() && !text.ends_with('\n') {
                    block.insert(0, '\n');
                }
                let appended = StructuredEdit {
                    target_file: edit.target_file.clone(),
                    old_span: String::new(),
                    new_span: restore_crlf(block, had_crlf),
                    explanation: edit.explanation.clone(),
                    start_line: Some(total + 1),
                };
                return Ok(appended);
            }
            (line - 1, line - 1, block)
        }
        LineOp::Delete { line, count } => (line - 1, line - 1 + count, String::new()),
        LineOp::Replace {
            line,
            count,
            content,
        } => {
            let end = line - 1 + count;
            let mut block = terminated(content);
            if end == total && !text.ends_with('\n') {
                block.pop();
            }
            (line - 1, end, block)
        }
    };
    if end > total || start >= total {
        return Err(TranslateError::LineOutOfRange {
            start: start + 1,
            end,
            total,
        });
    }

    let (old_span, new_span) = widen_until_unique(&text, &lines, start, end, &replacement)
        .ok_or(TranslateError::NotUnique { line: start + 1 })?;

    Ok(StructuredEdit {
        target_file: edit.target_file.clone(),
        old_span: restore_crlf(old_span, had_crlf),
        new_span: restore_crlf(new_span, had_crlf),
        explanation: edit.explanation.clone(),
        start_line: Some(start + 1),
    })
}

/// Grow the window `[start, end)` with neighbouring lines, alternating
/// forwards and backwards, until its text occurs exactly once.
fn widen_until_unique(
    text: &str,
    lines: &[&str],
    start: usize,
    end: usize,
    replacement: &str,
) -> Option<(String, String)> {
    let mut lo = start;
    // An insertion anchors on the line it is inserted before.
    let mut hi = if end == start { end + 1 } else { end };
    let mut grow_forward = true;
    loop {
        let window = lines[lo..hi].concat();
        if matches!(locate(text, &window), Located::Unique(_)) {
            let prefix = lines[lo..start].concat();
            let suffix = lines[end..hi].concat();
            return Some((window, format!("{prefix}{replacement}{suffix}")));
        }
        let can_grow_forward = hi < lines.len();
        let can_grow_backward = lo > 0;
        match (grow_forward, can_grow_forward, can_grow_backward) {
            (_, false, false) => return None,
            (true, true, _) | (false, true, false) => hi += 1,
            _ => lo -= 1,
        }
        grow_forward = !grow_forward;
    }
}

fn terminated(content: &str) -> String {
    let content = normalize_line_endings(content);
    if content.ends_with('\n') {
        content.into_owned()
    } else {
        format!("{content}\n")
    }
}

fn restore_crlf(text: String, had_crlf: bool) -> String {
    if had_crlf {
        text.replace('\n', "\r\n")
    } else {
        text
    }
}
