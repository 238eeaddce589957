//! Atomic file write helpers.
//!
//! Content is written to a temp file in the destination directory and renamed
//! over the target, so readers never observe a partially written file. On
//! Windows, rename-over-existing fails, so a backup-and-restore fallback is used.

use std::fs;
#[cfg(unix)]
use std::fs::{File, Permissions};
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
#[cfg(unix)]
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Let the new file inherit the default umask.
    #[default]
    Default,
    /// Keep the Unix mode the target had before it was replaced.
    ///
    /// Ignored on non-Unix platforms.
    Preserve(u32),
}

impl PersistMode {
    /// Mode to restore for `path`, if it exists.
    #[must_use]
    pub fn of_existing(path: &Path) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = fs::metadata(path) {
                return Self::Preserve(meta.permissions().mode() & 0o7777);
            }
        }
        #[cfg(not(unix))]
        let _ = path;
        Self::Default
    }

    #[cfg(unix)]
    fn mode(self) -> Option<u32> {
        match self {
            Self::Default => None,
            Self::Preserve(mode) => Some(mode),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSyncPolicy {
    SyncAll,
    SkipSync,
}

#[derive(Debug, Clone, Copy)]
pub struct AtomicWriteOptions {
    /// File sync policy for the temp file before persisting.
    pub file_sync: FileSyncPolicy,
    /// Permission policy for the persisted file.
    pub mode: PersistMode,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self {
        Self {
            file_sync: FileSyncPolicy::SyncAll,
            mode: PersistMode::Default,
        }
    }
}

impl AtomicWriteOptions {
    /// Options that keep the permissions of whatever currently lives at `path`.
    #[must_use]
    pub fn preserving(path: &Path) -> Self {
        Self {
            file_sync: FileSyncPolicy::SyncAll,
            mode: PersistMode::of_existing(path),
        }
    }
}

pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    atomic_write_with_options(path, bytes, AtomicWriteOptions::preserving(path))
}

pub fn atomic_write_with_options(
    path: impl AsRef<Path>,
    bytes: &[u8],
    options: AtomicWriteOptions,
) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    if matches!(options.file_sync, FileSyncPolicy::SyncAll) {
        tmp.as_file().sync_all()?;
    }

    if let Err(err) = tmp.persist(path) {
        if path.exists() {
            let backup_path = path.with_extension("bak");
            let _ = fs::remove_file(&backup_path);
            fs::rename(path, &backup_path)?;

            if let Err(rename_err) = err.file.persist(path) {
                let _ = fs::rename(&backup_path, path);
                return Err(rename_err.error);
            }
            if let Err(e) = fs::remove_file(&backup_path) {
                tracing::warn!(
                    path = %backup_path.display(),
                    "Failed to remove .bak after atomic write: {e}"
                );
            }
        } else {
            return Err(err.error);
        }
    }

    #[cfg(unix)]
    if let Some(mode) = options.mode.mode() {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, Permissions::from_mode(mode))?;
    }

    #[cfg(unix)]
    if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
        debug!(path = %parent.display(), "Parent directory sync_all failed (best-effort): {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        AtomicWriteOptions, FileSyncPolicy, PersistMode, atomic_write, atomic_write_with_options,
    };

    #[test]
    fn atomic_write_creates_and_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.txt");
        let opts = AtomicWriteOptions {
            file_sync: FileSyncPolicy::SkipSync,
            mode: PersistMode::Default,
        };

        atomic_write_with_options(&path, b"one", opts).expect("write one");
        atomic_write_with_options(&path, b"two", opts).expect("write two");

        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
        assert!(!path.with_extension("bak").exists());
        let leftovers = fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(leftovers, 1);
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_keeps_existing_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.sh");
        fs::write(&path, "#!/bin/sh\n").expect("seed");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");

        atomic_write(&path, b"#!/bin/sh\necho hi\n").expect("write");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "#!/bin/sh\necho hi\n"
        );
    }

    #[test]
    fn of_existing_defaults_for_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            PersistMode::of_existing(&dir.path().join("nope")),
            PersistMode::Default
        );
    }
}
