//! Configuration loading for filesys.
//!
//! The file lives at `~/.filesys/config.toml` unless `FILESYS_CONFIG` names
//! another path. Every section and field is optional; anything left out keeps
//! the defaults baked into `filesys-tools`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use filesys_tools::{FileLimits, GitSettings, PythonSettings, SearchToolConfig, ToolSettings, ValidationSettings};
use filesys_types::{ProtectedDirectorySet, SourceExtensions};
use serde::Deserialize;

pub const CONFIG_ENV: &str = "FILESYS_CONFIG";
pub const ROOT_ENV: &str = "FILESYS_ROOT";

#[derive(Debug, Default, Deserialize)]
pub struct FilesysConfig {
    pub sandbox: Option<SandboxConfig>,
    pub files: Option<FilesConfig>,
    pub validation: Option<ValidationConfig>,
    pub source_extensions: Option<SourceExtensionsConfig>,
    pub search: Option<SearchConfig>,
    pub git: Option<GitConfig>,
    pub python: Option<PythonConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SandboxConfig {
    pub root: Option<String>,
    /// Replaces the default protected set.
    pub protected_dirs: Option<Vec<String>>,
    #[serde(default)]
    pub extra_protected_dirs: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilesConfig {
    pub max_file_size_bytes: Option<u64>,
    pub default_list_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidationConfig {
    pub enabled: Option<bool>,
    pub skip_on_missing: Option<bool>,
    pub max_file_size_kb: Option<u64>,
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    /// Empty string drops the config-file requirement.
    pub config_file: Option<String>,
    pub repo_marker: Option<String>,
    pub temp_dir: Option<String>,
    pub timeouts: Option<ValidationTimeoutsConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidationTimeoutsConfig {
    pub validation_run_seconds: Option<u64>,
    pub recheck_run_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourceExtensionsConfig {
    /// Replaces the default table.
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub extra: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchConfig {
    pub max_workers: Option<usize>,
    pub max_results: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GitConfig {
    pub timeout_seconds: Option<u64>,
    pub env_denylist: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PythonConfig {
    pub min_workers: Option<usize>,
    pub max_workers: Option<usize>,
    pub timeouts: Option<PythonTimeoutsConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PythonTimeoutsConfig {
    pub worker_acquire_seconds: Option<u64>,
    pub execution_default_seconds: Option<u64>,
}

/// Expand `${VAR}` references. Unknown variables expand to nothing.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl FilesysConfig {
    /// Load from the default location. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Build tool settings, taking the root from the environment when the
    /// file does not set one.
    #[must_use]
    pub fn to_settings(&self) -> ToolSettings {
        let configured = self
            .sandbox
            .as_ref()
            .and_then(|s| s.root.as_deref())
            .map(expand_env_vars)
            .filter(|root| !root.is_empty());
        let root = resolve_root(
            configured,
            env::var(ROOT_ENV).ok(),
            env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        );
        self.settings_for_root(root)
    }

    #[must_use]
    pub fn settings_for_root(&self, root: PathBuf) -> ToolSettings {
        let mut settings = ToolSettings::for_root(root);

        if let Some(sandbox) = &self.sandbox {
            let base = match &sandbox.protected_dirs {
                Some(names) => ProtectedDirectorySet::new(names.iter().cloned()),
                None => ProtectedDirectorySet::default(),
            };
            settings.protected_dirs = if sandbox.extra_protected_dirs.is_empty() {
                base
            } else {
                ProtectedDirectorySet::new(
                    base.iter()
                        .map(ToString::to_string)
                        .chain(sandbox.extra_protected_dirs.iter().cloned()),
                )
            };
        }

        if let Some(files) = &self.files {
            settings.limits = FileLimits {
                max_file_size_bytes: files
                    .max_file_size_bytes
                    .unwrap_or(settings.limits.max_file_size_bytes),
                default_list_limit: files
                    .default_list_limit
                    .unwrap_or(settings.limits.default_list_limit),
            };
        }

        if let Some(exts) = &self.source_extensions {
            let base = match &exts.extensions {
                Some(list) => SourceExtensions::new(list),
                None => SourceExtensions::default(),
            };
            settings.source_extensions = base.with_extra(&exts.extra);
        }

        if let Some(validation) = &self.validation {
            settings.validation = validation.apply(settings.validation);
        }
        if let Some(search) = &self.search {
            settings.search = SearchToolConfig {
                max_workers: search.max_workers.unwrap_or(settings.search.max_workers).max(1),
                max_results: search.max_results.unwrap_or(settings.search.max_results),
                ..settings.search
            };
        }
        if let Some(git) = &self.git {
            settings.git = git.apply(settings.git);
        }
        if let Some(python) = &self.python {
            settings.python = python.apply(settings.python);
        }
        settings
    }
}

impl ValidationConfig {
    fn apply(&self, base: ValidationSettings) -> ValidationSettings {
        let timeouts = self.timeouts.as_ref();
        ValidationSettings {
            enabled: self.enabled.unwrap_or(base.enabled),
            skip_on_missing: self.skip_on_missing.unwrap_or(base.skip_on_missing),
            max_file_size_kb: self.max_file_size_kb.unwrap_or(base.max_file_size_kb),
            program: self
                .program
                .as_deref()
                .map(expand_env_vars)
                .unwrap_or(base.program),
            args: self.args.clone().unwrap_or(base.args),
            config_file: match self.config_file.as_deref() {
                Some("") => None,
                Some(file) => Some(expand_env_vars(file)),
                None => base.config_file,
            },
            repo_marker: self.repo_marker.clone().unwrap_or(base.repo_marker),
            temp_dir: self.temp_dir.clone().unwrap_or(base.temp_dir),
            run_timeout: timeouts
                .and_then(|t| t.validation_run_seconds)
                .map_or(base.run_timeout, Duration::from_secs),
            recheck_timeout: timeouts
                .and_then(|t| t.recheck_run_seconds)
                .map_or(base.recheck_timeout, Duration::from_secs),
            max_output_bytes: base.max_output_bytes,
        }
    }
}

impl GitConfig {
    fn apply(&self, base: GitSettings) -> GitSettings {
        GitSettings {
            timeout: self.timeout_seconds.map_or(base.timeout, Duration::from_secs),
            env_denylist: self.env_denylist.clone().unwrap_or(base.env_denylist),
            ..base
        }
    }
}

impl PythonConfig {
    fn apply(&self, base: PythonSettings) -> PythonSettings {
        let timeouts = self.timeouts.as_ref();
        let max_workers = self.max_workers.unwrap_or(base.max_workers).max(1);
        PythonSettings {
            min_workers: self.min_workers.unwrap_or(base.min_workers).min(max_workers),
            max_workers,
            worker_acquire_timeout: timeouts
                .and_then(|t| t.worker_acquire_seconds)
                .map_or(base.worker_acquire_timeout, Duration::from_secs),
            execution_default_timeout: timeouts
                .and_then(|t| t.execution_default_seconds)
                .map_or(base.execution_default_timeout, Duration::from_secs),
            ..base
        }
    }
}

/// Config file root, then `FILESYS_ROOT`, then the working directory.
fn resolve_root(configured: Option<String>, from_env: Option<String>, cwd: PathBuf) -> PathBuf {
    configured
        .or(from_env.filter(|root| !root.is_empty()))
        .map_or(cwd, PathBuf::from)
}

pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".filesys").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> FilesysConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world"), "hello world");
    }

    #[test]
    fn expand_env_vars_single_var() {
        unsafe {
            std::env::set_var("FILESYS_TEST_HOOK_DIR", "/opt/hooks");
        }
        assert_eq!(expand_env_vars("${FILESYS_TEST_HOOK_DIR}/bin/check"), "/opt/hooks/bin/check");
        unsafe {
            std::env::remove_var("FILESYS_TEST_HOOK_DIR");
        }
    }

    #[test]
    fn expand_env_vars_unknown_and_unclosed() {
        assert_eq!(expand_env_vars("a${FILESYS_TEST_UNSET_VAR}b"), "ab");
        assert_eq!(expand_env_vars("a${}b"), "ab");
        assert_eq!(expand_env_vars("tail ${OPEN"), "tail ${OPEN");
    }

    #[test]
    fn empty_config_keeps_defaults() {
        let settings = parse("").settings_for_root(PathBuf::from("/srv/project"));
        assert_eq!(settings.root, PathBuf::from("/srv/project"));
        assert_eq!(settings.limits, FileLimits::default());
        assert!(settings.protected_dirs.contains(".git"));
        assert_eq!(settings.validation.program, "pre-commit");
        assert_eq!(settings.python.max_workers, 5);
        assert_eq!(settings.git.timeout, Duration::from_secs(60));
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse(
            r#"
[files]
max_file_size_bytes = 2048
default_list_limit = 10

[validation]
program = "ruff"
args = ["check"]
config_file = ""
skip_on_missing = false

[validation.timeouts]
validation_run_seconds = 5

[search]
max_workers = 2

[git]
timeout_seconds = 15

[python]
max_workers = 2
min_workers = 4

[python.timeouts]
execution_default_seconds = 20
"#,
        );
        let settings = config.settings_for_root(PathBuf::from("/r"));
        assert_eq!(settings.limits.max_file_size_bytes, 2048);
        assert_eq!(settings.limits.default_list_limit, 10);
        assert_eq!(settings.validation.program, "ruff");
        assert_eq!(settings.validation.args, vec!["check"]);
        assert_eq!(settings.validation.config_file, None);
        assert!(!settings.validation.skip_on_missing);
        assert_eq!(settings.validation.run_timeout, Duration::from_secs(5));
        assert_eq!(settings.validation.recheck_timeout, Duration::from_secs(30));
        assert_eq!(settings.search.max_workers, 2);
        assert_eq!(settings.search.max_results, 10_000);
        assert_eq!(settings.git.timeout, Duration::from_secs(15));
        assert_eq!(settings.python.max_workers, 2);
        assert_eq!(settings.python.min_workers, 2);
        assert_eq!(settings.python.execution_default_timeout, Duration::from_secs(20));
    }

    #[test]
    fn protected_dirs_replace_or_extend() {
        let replaced = parse("[sandbox]\nprotected_dirs = [\"vendor\"]\n").settings_for_root(PathBuf::from("/r"));
        assert!(replaced.protected_dirs.contains("vendor"));
        assert!(!replaced.protected_dirs.contains(".git"));

        let extended = parse("[sandbox]\nextra_protected_dirs = [\"target\"]\n").settings_for_root(PathBuf::from("/r"));
        assert!(extended.protected_dirs.contains("target"));
        assert!(extended.protected_dirs.contains(".git"));
    }

    #[test]
    fn source_extensions_replace_or_extend() {
        let replaced = parse("[source_extensions]\nextensions = [\"rs\"]\n").settings_for_root(PathBuf::from("/r"));
        assert!(replaced.source_extensions.is_source(Path::new("a.rs")));
        assert!(!replaced.source_extensions.is_source(Path::new("a.py")));

        let extended = parse("[source_extensions]\nextra = [\".toml\"]\n").settings_for_root(PathBuf::from("/r"));
        assert!(extended.source_extensions.is_source(Path::new("Cargo.toml")));
        assert!(extended.source_extensions.is_source(Path::new("a.py")));
    }

    #[test]
    fn root_precedence() {
        let cwd = PathBuf::from("/cwd");
        assert_eq!(
            resolve_root(Some("/cfg".into()), Some("/env".into()), cwd.clone()),
            PathBuf::from("/cfg")
        );
        assert_eq!(resolve_root(None, Some("/env".into()), cwd.clone()), PathBuf::from("/env"));
        assert_eq!(resolve_root(None, Some(String::new()), cwd.clone()), cwd);
        assert_eq!(resolve_root(None, None, cwd.clone()), cwd);
    }

    #[test]
    fn load_from_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FilesysConfig::load_from(&dir.path().join("nope.toml")).unwrap().is_none());
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[files\nmax = ").unwrap();
        let err = FilesysConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn load_from_reads_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[git]\ntimeout_seconds = 5\n").unwrap();
        let config = FilesysConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(config.git.unwrap().timeout_seconds, Some(5));
    }
}
