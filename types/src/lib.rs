//! Core domain types for filesys.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod extraction;
mod offsets;
mod tables;
mod transport;

pub use extraction::{
    ExtractedImage, ExtractedSection, ExtractedTable, ExtractionOptions, ExtractionResult,
};
pub use offsets::{ContentMode, OffsetError, OffsetSpec, OffsetUnit, UnknownOffsetUnit};
pub use tables::{
    DEFAULT_PROTECTED_DIRS, DEFAULT_SOURCE_EXTENSIONS, ProtectedDirectorySet, SourceExtensions,
};
pub use transport::{
    SUPPORTED_FILE_ENCODINGS, TransportFormat, UnknownTransportFormat, is_supported_encoding,
};

use serde::Serialize;

// ============================================================================
// Validation outcome
// ============================================================================

/// Result of running a write payload past the validation hook.
///
/// When `valid` is true, `modified_content` is authoritative and replaces the
/// caller's payload. When false it holds the original payload, which must not
/// be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub modified_content: Vec<u8>,
}

impl ValidationOutcome {
    /// Pass through unchanged, optionally with an informational note.
    #[must_use]
    pub fn pass(content: Vec<u8>, note: Option<&str>) -> Self {
        Self {
            valid: true,
            errors: note.map(|n| vec![n.to_string()]).unwrap_or_default(),
            modified_content: content,
        }
    }

    #[must_use]
    pub fn reject(content: Vec<u8>, errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            modified_content: content,
        }
    }

    /// Whether the hook changed the payload relative to `original`.
    #[must_use]
    pub fn changed(&self, original: &[u8]) -> bool {
        self.modified_content != original
    }
}
