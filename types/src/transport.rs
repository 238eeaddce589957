//! Transport encodings for content crossing the request boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How content is represented on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportFormat {
    #[default]
    RawUtf8,
    Base64,
    QuotedPrintable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported format '{0}' (expected raw_utf8, base64, or quoted_printable)")]
pub struct UnknownTransportFormat(pub String);

impl TransportFormat {
    /// Parse a format name. `-` and `_` are interchangeable and case is ignored.
    pub fn parse(raw: &str) -> Result<Self, UnknownTransportFormat> {
        let normalized = raw.trim().replace('-', "_").to_ascii_lowercase();
        match normalized.as_str() {
            "raw_utf8" | "raw" | "utf8" => Ok(Self::RawUtf8),
            "base64" | "b64" => Ok(Self::Base64),
            "quoted_printable" | "qp" => Ok(Self::QuotedPrintable),
            _ => Err(UnknownTransportFormat(raw.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RawUtf8 => "raw_utf8",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted_printable",
        }
    }
}

/// Text encodings accepted for file content.
pub const SUPPORTED_FILE_ENCODINGS: &[&str] = &["utf-8", "utf8"];

#[must_use]
pub fn is_supported_encoding(name: &str) -> bool {
    let lower = name.trim().to_ascii_lowercase();
    SUPPORTED_FILE_ENCODINGS.contains(&lower.as_str())
}
