//! Settings consumed by the tool context.
//!
//! These are plain values; `filesys-config` builds them from TOML so this
//! crate never touches configuration files itself.

use std::path::PathBuf;

use filesys_types::{ProtectedDirectorySet, SourceExtensions};

use crate::git::GitSettings;
use crate::python::PythonSettings;
use crate::search::SearchToolConfig;
use crate::validation::ValidationSettings;

/// Serde helper for fields that default to `true`.
#[must_use]
pub const fn default_true() -> bool {
    true
}

pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Size and count limits for the filesystem tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLimits {
    /// Checked against metadata before any read.
    pub max_file_size_bytes: u64,
    pub default_list_limit: usize,
}

impl Default for FileLimits {
    fn default() -> Self {
        Self {
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            default_list_limit: DEFAULT_LIST_LIMIT,
        }
    }
}

/// Everything needed to build a [`crate::ToolCtx`].
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub root: PathBuf,
    pub protected_dirs: ProtectedDirectorySet,
    pub source_extensions: SourceExtensions,
    pub limits: FileLimits,
    pub validation: ValidationSettings,
    pub search: SearchToolConfig,
    pub git: GitSettings,
    pub python: PythonSettings,
}

impl ToolSettings {
    /// Defaults for everything except the root.
    #[must_use]
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            protected_dirs: ProtectedDirectorySet::default(),
            source_extensions: SourceExtensions::default(),
            limits: FileLimits::default(),
            validation: ValidationSettings::default(),
            search: SearchToolConfig::default(),
            git: GitSettings::default(),
            python: PythonSettings::default(),
        }
    }
}
