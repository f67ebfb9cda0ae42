//! Exact-match semantics for [`StructuredEdit`].
//!
//! There is no fuzzy matching: an edit whose `old_span` is missing or occurs
//! more than once is refused rather than applied to a guessed location.

use std::borrow::Cow;
use std::ops::Range;

use livepatch_protocol::EditKind;
use livepatch_protocol::StructuredEdit;

use crate::error::PatchConflict;

/// Outcome of a literal search for an `old_span`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    Unique(Range<usize>),
    /// Byte offsets of every match, overlapping matches included.
    Ambiguous(Vec<usize>),
    NotFound,
}

/// Literal substring search that succeeds only on exactly one match.
pub fn locate(text: &str, old_span: &str) -> Located {
    if old_span.is_empty() {
        return Located::NotFound;
    }
    let offsets = match_offsets(text, old_span);
    match offsets.as_slice() {
        [] => Located::NotFound,
        [start] => Located::Unique(*start..*start + old_span.len()),
        _ => Located::Ambiguous(offsets),
    }
}

/// The range an edit would replace in `text` right now. Inserts resolve to
/// the empty range at the end of the document.
pub fn resolve_range(text: &str, edit: &StructuredEdit) -> Result<Range<usize>, PatchConflict> {
    if edit.kind() == EditKind::Insert {
        return Ok(text.len()..text.len());
    }
    match locate(text, &edit.old_span) {
        Located::Unique(range) => Ok(range),
        Located::NotFound => Err(PatchConflict::NotFound),
        Located::Ambiguous(offsets) => Err(PatchConflict::Ambiguous {
            lines: offsets
                .into_iter()
                .map(|offset| line_of_offset(text, offset))
                .collect(),
        }),
    }
}

/// Apply one edit to `text`, all or nothing.
pub fn apply(text: &str, edit: &StructuredEdit) -> Result<String, PatchConflict> {
    let range = resolve_range(text, edit)?;
    Ok(splice(text, range, &edit.new_span))
}

/// Whether the edit can still be applied against `text`.
pub fn is_applicable(text: &str, edit: &StructuredEdit) -> bool {
    resolve_range(text, edit).is_ok()
}

pub(crate) fn splice(text: &str, range: Range<usize>, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len() - range.len() + replacement.len());
    out.push_str(&text[..range.start]);
    out.push_str(replacement);
    out.push_str(&text[range.end..]);
    out
}

fn match_offsets(text: &str, needle: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut from = 0;
    while let Some(found) = text[from..].find(needle) {
        let start = from + found;
        offsets.push(start);
        // Step one char past the match start so overlapping occurrences count.
        let step = text[start..].chars().next().map_or(1, char::len_utf8);
        from = start + step;
        if from > text.len() {
            break;
        }
    }
    offsets
}

/// 1-based line containing byte `offset`.
pub fn line_of_offset(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

/// Number of lines an editor shows for `text`; a trailing newline opens one
/// more (empty) line.
pub fn line_count(text: &str) -> usize {
    text.bytes().filter(|b| *b == b'\n').count() + 1
}

/// Inclusive 1-based line span covered by `range`. A trailing newline does
/// not extend the span onto the next line.
pub fn line_span(text: &str, range: &Range<usize>) -> (usize, usize) {
    let start = line_of_offset(text, range.start);
    if range.is_empty() {
        return (start, start);
    }
    let last = if text.as_bytes().get(range.end - 1) == Some(&b'\n') && range.len() > 1 {
        range.end - 2
    } else {
        range.end - 1
    };
    (start, line_of_offset(text, last).max(start))
}

/// Normalize `\r\n` to `\n`. All line arithmetic runs on normalized text.
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn locate_requires_exactly_one_match() {
        assert_eq!(locate("alpha beta", "beta"), Located::Unique(6..10));
        assert_eq!(locate("alpha beta", "gamma"), Located::NotFound);
        assert_eq!(locate("x and x", "x"), Located::Ambiguous(vec![0, 6]));
    }

    #[test]
    fn locate_counts_overlapping_matches() {
        assert_eq!(locate("aaa", "aa"), Located::Ambiguous(vec![0, 1]));
    }

    #[test]
    fn locate_is_literal_not_regex() {
        assert_eq!(locate("a.b axb", "a.b"), Located::Unique(0..3));
    }

    #[test]
    fn apply_replaces_deletes_and_appends() {
        let text = "one\ntwo\nthree\n";
        assert_eq!(
            apply(text, &StructuredEdit::new("two", "2")).as_deref(),
            Ok("one\n2\nthree\n")
        );
        assert_eq!(
            apply(text, &StructuredEdit::new("two\n", "")).as_deref(),
            Ok("one\nthree\n")
        );
        assert_eq!(
            apply(text, &StructuredEdit::new("", "four\n")).as_deref(),
            Ok("one\ntwo\nthree\nfour\n")
        );
    }

    #[test]
    fn ambiguous_apply_reports_lines_and_changes_nothing() {
        let text = "x\ny\nx\n";
        let err = apply(text, &StructuredEdit::new("x", "z")).unwrap_err();
        assert_eq!(err, PatchConflict::Ambiguous { lines: vec![1, 3] });
    }

    #[test]
    fn handles_multibyte_text() {
        let text = "héllo wörld";
        assert_eq!(
            apply(text, &StructuredEdit::new("wörld", "world")).as_deref(),
            Ok("héllo world")
        );
        assert_eq!(locate("ééé", "éé"), Located::Ambiguous(vec![0, 2]));
    }

    #[test]
    fn line_helpers() {
        let text = "A\nB\nC\n";
        assert_eq!(line_count(text), 4);
        assert_eq!(line_count(""), 1);
        assert_eq!(line_of_offset(text, 0), 1);
        assert_eq!(line_of_offset(text, 2), 2);
        assert_eq!(line_span(text, &(2..4)), (2, 2));
        assert_eq!(line_span(text, &(0..5)), (1, 3));
        assert_eq!(line_span(text, &(6..6)), (4, 4));
    }

    #[test]
    fn normalizes_crlf() {
        assert_eq!(normalize_line_endings("a\r\nb\r\n"), "a\nb\n");
        assert!(matches!(normalize_line_endings("a\nb"), Cow::Borrowed(_)));
    }
}
