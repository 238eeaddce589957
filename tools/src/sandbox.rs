//! Root-directory sandbox: path resolution and protected-subtree policy.

use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use filesys_types::ProtectedDirectorySet;

use super::{DenialReason, ToolError};

/// An absolute path proven to be the sandbox root or one of its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    absolute: PathBuf,
    relative: PathBuf,
    /// Root-relative path after following symlinks in the existing prefix.
    canonical_relative: PathBuf,
}

impl ResolvedPath {
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.absolute
    }

    /// Root-stripped form; empty for the root itself.
    #[must_use]
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Root-stripped form with symlinks in the existing prefix followed.
    #[must_use]
    pub fn canonical_relative(&self) -> &Path {
        &self.canonical_relative
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.relative.as_os_str().is_empty()
    }

    /// Forward-slash relative display form, `.` for the root.
    #[must_use]
    pub fn display_relative(&self) -> String {
        display_relative(&self.relative)
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.absolute
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_relative())
    }
}

/// Blocks mutations inside protected subtrees.
#[derive(Debug, Clone, Default)]
pub struct ProtectedPathPolicy {
    names: ProtectedDirectorySet,
}

impl ProtectedPathPolicy {
    #[must_use]
    pub fn new(names: ProtectedDirectorySet) -> Self {
        Self { names }
    }

    /// Fail if any segment of the root-stripped path, as typed or with
    /// symlinks followed, is a protected name.
    pub fn check(&self, resolved: &ResolvedPath) -> Result<(), ToolError> {
        let hit = self
            .names
            .first_protected_segment(resolved.relative())
            .or_else(|| self.names.first_protected_segment(resolved.canonical_relative()));
        match hit {
            Some(segment) => {
                tracing::warn!(path = %resolved, %segment, "Blocked mutation in protected directory");
                Err(ToolError::SandboxViolation(
                    DenialReason::ProtectedDirectory {
                        attempted: resolved.display_relative(),
                        segment,
                    },
                ))
            }
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn names(&self) -> &ProtectedDirectorySet {
        &self.names
    }
}

/// Filesystem sandbox rooted at a single canonical directory.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    root_name: Option<OsString>,
    policy: ProtectedPathPolicy,
}

impl Sandbox {
    pub fn new(root: impl AsRef<Path>, protected: ProtectedDirectorySet) -> Result<Self, ToolError> {
        let root = root.as_ref();
        let canonical = std::fs::canonicalize(root).map_err(|e| {
            ToolError::SandboxViolation(DenialReason::InvalidPath {
                attempted: root.display().to_string(),
                message: format!("root directory is not accessible: {e}"),
            })
        })?;
        if !canonical.is_dir() {
            return Err(ToolError::NotADirectory {
                path: canonical.display().to_string(),
            });
        }
        let root_name = canonical.file_name().map(ToOwned::to_owned);
        Ok(Self {
            root: canonical,
            root_name,
            policy: ProtectedPathPolicy::new(protected),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root-relative display form of an absolute path already known to be inside root.
    #[must_use]
    pub fn display_within(&self, absolute: &Path) -> String {
        display_relative(absolute.strip_prefix(&self.root).unwrap_or(absolute))
    }

    #[must_use]
    pub fn policy(&self) -> &ProtectedPathPolicy {
        &self.policy
    }

    /// Resolve a caller-supplied path for reading or listing.
    pub fn resolve(&self, input: &str) -> Result<ResolvedPath, ToolError> {
        self.resolve_inner(input).inspect_err(|err| {
            tracing::warn!(path = input, error = %err, "Path rejected by sandbox");
        })
    }

    /// Resolve a path that is about to be created, written, or deleted.
    pub fn resolve_for_mutation(&self, input: &str) -> Result<ResolvedPath, ToolError> {
        let resolved = self.resolve(input)?;
        self.policy.check(&resolved)?;
        Ok(resolved)
    }

    /// Post-creation check: after `create_dir_all`, the parent must still
    /// canonicalize under root with no symlink swapped into the chain.
    pub fn validate_created_parent(&self, resolved: &ResolvedPath) -> Result<(), ToolError> {
        let Some(parent) = resolved.as_path().parent() else {
            return Ok(());
        };

        let mut current = parent.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            if let Ok(meta) = std::fs::symlink_metadata(&current)
                && meta.file_type().is_symlink()
            {
                let target = std::fs::canonicalize(&current).unwrap_or_default();
                if !target.starts_with(&self.root) {
                    return Err(self.outside(resolved.as_path().display().to_string()));
                }
            }
            if !current.pop() {
                break;
            }
        }

        let canonical = std::fs::canonicalize(parent)
            .map_err(|_| self.outside(resolved.as_path().display().to_string()))?;
        if !canonical.starts_with(&self.root) {
            return Err(self.outside(resolved.as_path().display().to_string()));
        }
        Ok(())
    }

    fn resolve_inner(&self, input: &str) -> Result<ResolvedPath, ToolError> {
        if contains_unsafe_path_chars(input) {
            return Err(ToolError::SandboxViolation(DenialReason::InvalidPath {
                attempted: input.to_string(),
                message: "path contains invalid control characters".to_string(),
            }));
        }

        let normalized = normalize_separators(input);
        let candidate = Path::new(&normalized);

        let relative = if is_absolute_like(candidate, &normalized) {
            match self.existing_descendant(candidate) {
                Some(rel) => rel,
                None => self.map_absolute_to_root(candidate).ok_or_else(|| {
                    ToolError::SandboxViolation(DenialReason::Unmappable {
                        attempted: input.to_string(),
                        root: self.root.clone(),
                    })
                })?,
            }
        } else {
            candidate.to_path_buf()
        };

        let relative = normalize_lexically(&relative).ok_or_else(|| self.outside(input))?;
        let absolute = self.root.join(&relative);
        if !absolute.starts_with(&self.root) {
            return Err(self.outside(input));
        }
        let canonical_relative = self.corroborate(&absolute, input)?;

        Ok(ResolvedPath {
            absolute,
            relative,
            canonical_relative,
        })
    }

    /// Root-relative remainder when `candidate` already exists under root.
    fn existing_descendant(&self, candidate: &Path) -> Option<PathBuf> {
        let canonical = std::fs::canonicalize(candidate).ok()?;
        canonical
            .strip_prefix(&self.root)
            .ok()
            .map(Path::to_path_buf)
    }

    /// Drop everything up to and including the first segment named like the root.
    fn map_absolute_to_root(&self, candidate: &Path) -> Option<PathBuf> {
        let root_name = self.root_name.as_deref()?;
        let segments: Vec<Component<'_>> = candidate
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        let idx = segments
            .iter()
            .position(|c| matches!(c, Component::Normal(name) if *name == root_name))?;
        Some(segments[idx + 1..].iter().collect())
    }

    /// Symlink check: the path, or its nearest existing ancestor, must
    /// canonicalize under root.
    ///
    /// Returns the root-relative canonical ancestor joined with the part of
    /// the path that does not exist yet.
    fn corroborate(&self, absolute: &Path, input: &str) -> Result<PathBuf, ToolError> {
        let mut existing = absolute;
        loop {
            if std::fs::symlink_metadata(existing).is_ok() {
                break;
            }
            match existing.parent() {
                Some(parent) => existing = parent,
                None => return Err(self.outside(input)),
            }
        }

        // A dangling symlink fails to canonicalize and is rejected.
        let canonical = std::fs::canonicalize(existing).map_err(|_| self.outside(input))?;
        let inside = canonical
            .strip_prefix(&self.root)
            .map_err(|_| self.outside(input))?;
        match absolute.strip_prefix(existing) {
            Ok(missing) if !missing.as_os_str().is_empty() => Ok(inside.join(missing)),
            _ => Ok(inside.to_path_buf()),
        }
    }

    fn outside(&self, input: impl Into<String>) -> ToolError {
        ToolError::SandboxViolation(DenialReason::OutsideRoot {
            attempted: input.into(),
        })
    }
}

/// Convert `\` to `/` on platforms where backslash is not a separator.
fn normalize_separators(input: &str) -> String {
    if cfg!(windows) {
        input.to_string()
    } else {
        input.replace('\\', "/")
    }
}

fn is_absolute_like(path: &Path, raw: &str) -> bool {
    path.is_absolute() || raw.starts_with('/') || raw.starts_with('\\')
}

/// Stack-based `.`/`..` normalization without touching the filesystem.
///
/// Returns `None` when the path climbs above its starting point.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut stack: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                stack.pop()?;
            }
            Component::Normal(segment) => stack.push(segment),
        }
    }
    Some(stack.iter().collect())
}

fn display_relative(relative: &Path) -> String {
    if relative.as_os_str().is_empty() {
        return ".".to_string();
    }
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn contains_unsafe_path_chars(input: &str) -> bool {
    input.chars().any(is_unsafe_path_char)
}

/// C0/C1 control characters and DEL.
fn is_unsafe_path_char(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{001f}' | '\u{007f}' | '\u{0080}'..='\u{009f}')
}
