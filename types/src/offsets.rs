//! Offset addressing for range reads and edits.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Addressing granularity for a sub-range of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OffsetUnit {
    Byte,
    Char,
    #[default]
    Line,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown offset type '{0}' (expected line, char, or byte)")]
pub struct UnknownOffsetUnit(pub String);

impl OffsetUnit {
    pub fn parse(raw: &str) -> Result<Self, UnknownOffsetUnit> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "byte" | "bytes" => Ok(Self::Byte),
            "char" | "chars" | "character" => Ok(Self::Char),
            "line" | "lines" => Ok(Self::Line),
            _ => Err(UnknownOffsetUnit(raw.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Line => "line",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffsetError {
    #[error("start offset must be >= 0 (got {0})")]
    NegativeStart(i64),
    #[error("end offset must be >= 0 or -1 for end of file (got {0})")]
    InvalidEnd(i64),
    #[error("line numbers are 1-based (got {0})")]
    ZeroLine(i64),
}

/// An inclusive `[start, end]` range in one unit; `end == None` means "to end".
///
/// Indices are 0-based. The wire form uses `-1` as the only sentinel for
/// "rest of file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetSpec {
    pub unit: OffsetUnit,
    pub start: usize,
    pub end: Option<usize>,
}

impl OffsetSpec {
    #[must_use]
    pub const fn whole(unit: OffsetUnit) -> Self {
        Self {
            unit,
            start: 0,
            end: None,
        }
    }

    /// Build a spec from wire integers (`end == -1` means to end).
    pub fn from_wire(unit: OffsetUnit, start: i64, end: i64) -> Result<Self, OffsetError> {
        let start = usize::try_from(start).map_err(|_| OffsetError::NegativeStart(start))?;
        let end = match end {
            -1 => None,
            e if e >= 0 => Some(e as usize),
            e => return Err(OffsetError::InvalidEnd(e)),
        };
        Ok(Self { unit, start, end })
    }

    /// Legacy 1-based `start_line` / `end_line` pair.
    pub fn from_line_numbers(
        start_line: Option<i64>,
        end_line: Option<i64>,
    ) -> Result<Self, OffsetError> {
        let start = match start_line {
            None => 0,
            Some(n) if n >= 1 => (n - 1) as usize,
            Some(n) => return Err(OffsetError::ZeroLine(n)),
        };
        let end = match end_line {
            None => None,
            Some(n) if n >= 1 => Some((n - 1) as usize),
            Some(n) => return Err(OffsetError::ZeroLine(n)),
        };
        Ok(Self {
            unit: OffsetUnit::Line,
            start,
            end,
        })
    }

    /// Same range, different unit. Used for the binary byte-mode override.
    #[must_use]
    pub const fn with_unit(self, unit: OffsetUnit) -> Self {
        Self {
            unit,
            start: self.start,
            end: self.end,
        }
    }

    /// Exclusive end index clamped to `len`.
    #[must_use]
    pub fn end_exclusive(&self, len: usize) -> usize {
        match self.end {
            None => len,
            Some(end) => end.saturating_add(1).min(len),
        }
    }

    /// Clamped `start..end` for slicing a sequence of `len` items.
    #[must_use]
    pub fn clamped(&self, len: usize) -> std::ops::Range<usize> {
        let end = self.end_exclusive(len);
        let start = self.start.min(end);
        start..end
    }
}

/// Whether content is handled as UTF-8 text or raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    #[default]
    Text,
    Binary,
}
