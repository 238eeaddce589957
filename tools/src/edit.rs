//! Range splicing and substring replacement over in-memory file content.

use aho_corasick::{AhoCorasick, MatchKind};
use filesys_types::{OffsetSpec, OffsetUnit};
use regex::Regex;

use super::ToolError;
use super::offsets::split_lines;

/// How many occurrences a replace may touch; `None` is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccurrenceLimit(Option<usize>);

impl OccurrenceLimit {
    pub const UNLIMITED: Self = Self(None);

    /// `-1` is unlimited; other values must be positive.
    pub fn from_wire(n: i64) -> Result<Self, ToolError> {
        match n {
            -1 => Ok(Self(None)),
            n if n > 0 => Ok(Self(usize::try_from(n).ok())),
            n => Err(ToolError::BadArgs {
                message: format!("number_of_occurrences must be positive or -1 (got {n})"),
            }),
        }
    }

    fn apply(self, found: usize) -> usize {
        self.0.map_or(found, |limit| found.min(limit))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced<T> {
    pub content: T,
    pub replacements: usize,
}

/// Replace the inclusive `spec` range of `original` with `replacement`.
///
/// `as_bytes` selects a raw byte splice (binary files or binary mode);
/// otherwise both sides must be UTF-8 and the unit is honoured.
pub fn splice(
    original: &[u8],
    spec: OffsetSpec,
    replacement: &[u8],
    as_bytes: bool,
) -> Result<Vec<u8>, ToolError> {
    if as_bytes {
        let range = checked_range(spec.with_unit(OffsetUnit::Byte), original.len())?;
        return Ok(splice_slice(original, range, replacement));
    }

    let text = std::str::from_utf8(original).map_err(|_| ToolError::UnsupportedFormat {
        message: "file is not valid UTF-8; use binary mode".to_string(),
    })?;
    let replacement = std::str::from_utf8(replacement).map_err(|_| ToolError::BadArgs {
        message: "new_content is not valid UTF-8 in text mode".to_string(),
    })?;

    match spec.unit {
        OffsetUnit::Line => {
            let lines = split_lines(text);
            let range = checked_range(spec, lines.len())?;
            let mut out = String::with_capacity(text.len() + replacement.len() + 1);
            out.extend(lines[..range.start].iter().copied());
            if !replacement.is_empty() {
                out.push_str(replacement);
                if !replacement.ends_with('\n') {
                    out.push('\n');
                }
            }
            out.extend(lines[range.end..].iter().copied());
            Ok(out.into_bytes())
        }
        OffsetUnit::Char => {
            let boundaries: Vec<usize> = text
                .char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(text.len()))
                .collect();
            let range = checked_range(spec, boundaries.len() - 1)?;
            let bytes = boundaries[range.start]..boundaries[range.end];
            Ok(splice_slice(original, bytes, replacement.as_bytes()))
        }
        OffsetUnit::Byte => {
            let range = checked_range(spec, original.len())?;
            let spliced = splice_slice(original, range, replacement.as_bytes());
            if std::str::from_utf8(&spliced).is_err() {
                return Err(ToolError::BadArgs {
                    message: "byte range splits a multi-byte character; use binary mode".to_string(),
                });
            }
            Ok(spliced)
        }
    }
}

/// Validate an inclusive spec against `len` items and return the half-open range.
///
/// `start == len` with `end == -1` is an append.
fn checked_range(spec: OffsetSpec, len: usize) -> Result<std::ops::Range<usize>, ToolError> {
    let out_of_bounds = || ToolError::RangeOutOfBounds {
        message: format!(
            "start {} / end {} is outside 0..{len} ({}s)",
            spec.start,
            spec.end.map_or_else(|| "-1".to_string(), |e| e.to_string()),
            spec.unit.as_str()
        ),
    };
    if spec.start > len {
        return Err(out_of_bounds());
    }
    match spec.end {
        None => Ok(spec.start..len),
        Some(end) if end < len && spec.start <= end + 1 => Ok(spec.start..end + 1),
        Some(_) => Err(out_of_bounds()),
    }
}

fn splice_slice(original: &[u8], range: std::ops::Range<usize>, replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(original.len() - range.len() + replacement.len());
    out.extend_from_slice(&original[..range.start]);
    out.extend_from_slice(replacement);
    out.extend_from_slice(&original[range.end..]);
    out
}

/// Literal replace of the first `limit` leftmost non-overlapping occurrences.
pub fn replace_exact(
    haystack: &[u8],
    old: &[u8],
    new: &[u8],
    limit: OccurrenceLimit,
) -> Result<Replaced<Vec<u8>>, ToolError> {
    if old.is_empty() {
        return Err(ToolError::BadArgs {
            message: "old_content must not be empty".to_string(),
        });
    }
    let matcher = AhoCorasick::builder()
        .match_kind(MatchKind::LeftmostFirst)
        .build([old])
        .map_err(|e| ToolError::BadArgs {
            message: format!("invalid search string: {e}"),
        })?;

    let found = matcher.find_iter(haystack).count();
    let replacements = limit.apply(found);

    let mut out = Vec::with_capacity(haystack.len());
    let mut last = 0;
    for m in matcher.find_iter(haystack).take(replacements) {
        out.extend_from_slice(&haystack[last..m.start()]);
        out.extend_from_slice(new);
        last = m.end();
    }
    out.extend_from_slice(&haystack[last..]);

    Ok(Replaced {
        content: out,
        replacements,
    })
}

/// Regex replace with `$1`-style group references.
///
/// The reported count comes from a separate `find_iter` pass and is not
/// reconciled with the substitution itself.
pub fn replace_regex(
    text: &str,
    pattern: &str,
    replacement: &str,
    limit: OccurrenceLimit,
) -> Result<Replaced<String>, ToolError> {
    if pattern.is_empty() {
        return Err(ToolError::BadArgs {
            message: "old_content must not be empty".to_string(),
        });
    }
    let re = Regex::new(pattern).map_err(|e| ToolError::BadArgs {
        message: format!("invalid regex '{pattern}': {e}"),
    })?;

    let found = re.find_iter(text).count();
    let content = re
        .replacen(text, limit.0.unwrap_or(0), replacement)
        .into_owned();

    Ok(Replaced {
        content,
        replacements: limit.apply(found),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_spec(start: i64, end: i64) -> OffsetSpec {
        OffsetSpec::from_wire(OffsetUnit::Line, start, end).unwrap()
    }

    fn splice_text(original: &str, spec: OffsetSpec, new: &str) -> Result<String, ToolError> {
        splice(original.as_bytes(), spec, new.as_bytes(), false)
            .map(|b| String::from_utf8(b).unwrap())
    }

    #[test]
    fn line_splice_adds_missing_terminator() {
        assert_eq!(splice_text("hello", line_spec(0, 0), "bye").unwrap(), "bye\n");
        assert_eq!(
            splice_text("a\nb\nc\n", line_spec(1, 1), "B").unwrap(),
            "a\nB\nc\n"
        );
    }

    #[test]
    fn line_splice_to_end_and_append() {
        assert_eq!(splice_text("a\nb\nc\n", line_spec(1, -1), "z\n").unwrap(), "a\nz\n");
        assert_eq!(splice_text("a\nb\n", line_spec(2, -1), "c").unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn empty_replacement_deletes_lines() {
        assert_eq!(splice_text("a\nb\nc\n", line_spec(0, 1), "").unwrap(), "c\n");
    }

    #[test]
    fn line_splice_preserves_crlf_elsewhere() {
        assert_eq!(
            splice_text("a\r\nb\r\nc\r\n", line_spec(1, 1), "B\r\n").unwrap(),
            "a\r\nB\r\nc\r\n"
        );
    }

    #[test]
    fn out_of_bounds_ranges_fail() {
        let err = splice_text("a\nb\n", line_spec(0, 2), "x").unwrap_err();
        assert_eq!(err.kind(), "range_out_of_bounds");
        assert!(splice_text("a\nb\n", line_spec(3, -1), "x").is_err());
        assert!(splice_text("a\nb\nc\n", line_spec(2, 0), "x").is_err());
    }

    #[test]
    fn char_splice_respects_multibyte() {
        let spec = OffsetSpec::from_wire(OffsetUnit::Char, 1, 1).unwrap();
        assert_eq!(splice_text("héllo", spec, "e").unwrap(), "hello");
    }

    #[test]
    fn text_byte_splice_must_stay_utf8() {
        let spec = OffsetSpec::from_wire(OffsetUnit::Byte, 1, 1).unwrap();
        assert!(splice_text("héllo", spec, "e").is_err());
        let spec = OffsetSpec::from_wire(OffsetUnit::Byte, 1, 2).unwrap();
        assert_eq!(splice_text("héllo", spec, "e").unwrap(), "hello");
    }

    #[test]
    fn byte_mode_splices_raw() {
        let spec = OffsetSpec::from_wire(OffsetUnit::Line, 1, 2).unwrap();
        let out = splice(&[0, 1, 2, 3], spec, &[9], true).unwrap();
        assert_eq!(out, vec![0, 9, 3]);
    }

    #[test]
    fn exact_replace_honours_limit() {
        let out = replace_exact(b"a a a", b"a", b"b", OccurrenceLimit::from_wire(2).unwrap()).unwrap();
        assert_eq!(out.content, b"b b a");
        assert_eq!(out.replacements, 2);

        let out = replace_exact(b"aaaa", b"aa", b"x", OccurrenceLimit::UNLIMITED).unwrap();
        assert_eq!(out.content, b"xx");
        assert_eq!(out.replacements, 2);
    }

    #[test]
    fn exact_replace_rejects_empty_needle() {
        assert_eq!(
            replace_exact(b"abc", b"", b"x", OccurrenceLimit::UNLIMITED).unwrap_err().kind(),
            "bad_args"
        );
    }

    #[test]
    fn regex_replace_uses_group_syntax() {
        let out = replace_regex("foo1 foo2", r"foo(\d)", "bar$1", OccurrenceLimit::UNLIMITED).unwrap();
        assert_eq!(out.content, "bar1 bar2");
        assert_eq!(out.replacements, 2);

        let out = replace_regex("x x x", "x", "y", OccurrenceLimit::from_wire(1).unwrap()).unwrap();
        assert_eq!(out.content, "y x x");
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn regex_count_is_independent_pass() {
        let out = replace_regex("abc", "z*", "-", OccurrenceLimit::UNLIMITED).unwrap();
        assert_eq!(out.replacements, 4);
        assert_eq!(out.content, "-a-b-c-");
    }

    #[test]
    fn zero_limit_is_rejected() {
        assert!(OccurrenceLimit::from_wire(0).is_err());
        assert!(OccurrenceLimit::from_wire(-2).is_err());
    }
}
