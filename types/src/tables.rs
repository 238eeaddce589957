//! Read-only classification tables built once at startup.

use std::collections::BTreeSet;
use std::path::{Component, Path};

// ============================================================================
// Protected directories
// ============================================================================

/// Subtree names that mutating operations may never touch.
pub const DEFAULT_PROTECTED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".venv",
    "venv",
    "__pycache__",
    "node_modules",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".tox",
];

/// Immutable set of protected path-segment names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedDirectorySet {
    names: BTreeSet<String>,
}

impl Default for ProtectedDirectorySet {
    fn default() -> Self {
        Self::new(DEFAULT_PROTECTED_DIRS.iter().copied())
    }
}

impl ProtectedDirectorySet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.trim().is_empty())
                .collect(),
        }
    }

    /// Default set plus `extra`.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        set.names
            .extend(extra.into_iter().map(Into::into).filter(|n| !n.trim().is_empty()));
        set
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// First segment of `relative` whose name is protected.
    #[must_use]
    pub fn first_protected_segment(&self, relative: &Path) -> Option<String> {
        relative.components().find_map(|component| match component {
            Component::Normal(segment) => {
                let segment = segment.to_string_lossy();
                self.contains(&segment).then(|| segment.into_owned())
            }
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

// ============================================================================
// Source-code extensions
// ============================================================================

/// Extensions treated as source code (line numbers on, validation hook runs).
pub const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".jsx", ".tsx", ".java", ".cpp", ".c", ".h", ".cs", ".go", ".rs", ".rb",
    ".php", ".swift", ".kt", ".scala", ".html", ".css", ".scss", ".sass", ".vue", ".yaml", ".yml",
    ".json", ".xml", ".md", ".sh", ".bash", ".zsh", ".fish",
];

/// Immutable extension classification table.
///
/// Rebuilding means constructing a new table and swapping the shared reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceExtensions {
    extensions: BTreeSet<String>,
}

impl Default for SourceExtensions {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_EXTENSIONS.iter().copied())
    }
}

impl SourceExtensions {
    /// Entries are lowercased and given a leading dot if missing.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .filter_map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
        }
    }

    #[must_use]
    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions
            .extend(extra.into_iter().filter_map(|ext| normalize_extension(ext.as_ref())));
        self
    }

    #[must_use]
    pub fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(normalize_extension)
            .is_some_and(|ext| self.extensions.contains(&ext))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_ascii_lowercase()))
}
