//! Pre-write validation hook with autofix-and-recheck.
//!
//! Every write-class operation runs its final payload past [`ValidationGate`]
//! before touching disk. The gate first walks an ordered list of guards that
//! can short-circuit to a pass or reject; only when all of them fall through
//! is the external hook run against a temporary copy inside the repository.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use filesys_types::{SourceExtensions, ValidationOutcome};

use super::EnvSanitizer;
use super::process::{ProcessOutput, ProcessRequest, run_with_timeout};

pub const NOTE_TOO_LARGE: &str = "File too large for validation";
pub const NOTE_NO_REPOSITORY: &str = "Not in a repository";
pub const NOTE_AUTOFIXED: &str = "Validation hook applied automatic fixes";
pub const ERR_UNAVAILABLE: &str = "Validation hook is not installed or configured";
pub const ERR_TIMEOUT: &str = "Validation hook timed out";
pub const ERR_RECHECK_TIMEOUT: &str = "Validation hook autofix timed out";

#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub enabled: bool,
    /// Pass instead of reject when the hook or its config is missing.
    pub skip_on_missing: bool,
    pub max_file_size_kb: u64,
    pub program: String,
    pub args: Vec<String>,
    /// Must exist at the repository root for the hook to count as configured.
    pub config_file: Option<String>,
    pub repo_marker: String,
    pub temp_dir: String,
    pub run_timeout: Duration,
    pub recheck_timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_on_missing: true,
            max_file_size_kb: 1024,
            program: "pre-commit".to_string(),
            args: vec!["run".to_string(), "--files".to_string()],
            config_file: Some(".pre-commit-config.yaml".to_string()),
            repo_marker: ".git".to_string(),
            temp_dir: ".precommit_tmp".to_string(),
            run_timeout: Duration::from_secs(30),
            recheck_timeout: Duration::from_secs(30),
            max_output_bytes: 256 * 1024,
        }
    }
}

/// Result of the guard sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
enum GateDecision {
    PassThrough(Option<&'static str>),
    Reject(&'static str),
    Proceed { program: PathBuf, repo_root: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ValidationGate {
    settings: ValidationSettings,
    env: EnvSanitizer,
}

impl ValidationGate {
    #[must_use]
    pub fn new(settings: ValidationSettings, env: EnvSanitizer) -> Self {
        Self { settings, env }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            settings: ValidationSettings {
                enabled: false,
                ..ValidationSettings::default()
            },
            env: EnvSanitizer::default(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Validate `content` as the future contents of `target`.
    ///
    /// Never fails: hook crashes and timeouts become `valid = false`.
    pub async fn validate(
        &self,
        target: &Path,
        content: Vec<u8>,
        extensions: &SourceExtensions,
    ) -> ValidationOutcome {
        match self.decide(target, content.len(), extensions) {
            GateDecision::PassThrough(note) => ValidationOutcome::pass(content, note),
            GateDecision::Reject(reason) => {
                ValidationOutcome::reject(content, vec![reason.to_string()])
            }
            GateDecision::Proceed { program, repo_root } => {
                self.run_hook(&program, &repo_root, target, content).await
            }
        }
    }

    fn decide(&self, target: &Path, len: usize, extensions: &SourceExtensions) -> GateDecision {
        let s = &self.settings;
        if !s.enabled {
            return GateDecision::PassThrough(None);
        }
        if !extensions.is_source(target) {
            tracing::debug!(path = %target.display(), "Skipping validation for non-source file");
            return GateDecision::PassThrough(None);
        }
        if len as u64 > s.max_file_size_kb.saturating_mul(1024) {
            tracing::debug!(path = %target.display(), len, "Skipping validation for large payload");
            return GateDecision::PassThrough(Some(NOTE_TOO_LARGE));
        }

        let repo_root = find_repo_root(target, &s.repo_marker);
        let program = which::which(&s.program).ok();
        let configured = match (&s.config_file, &repo_root) {
            (Some(config), Some(root)) => root.join(config).is_file(),
            _ => true,
        };
        let Some(program) = program.filter(|_| configured) else {
            tracing::debug!(program = %s.program, configured, "Validation hook unavailable");
            return if s.skip_on_missing {
                GateDecision::PassThrough(None)
            } else {
                GateDecision::Reject(ERR_UNAVAILABLE)
            };
        };
        let Some(repo_root) = repo_root else {
            tracing::debug!(path = %target.display(), "No repository root for validation");
            return GateDecision::PassThrough(Some(NOTE_NO_REPOSITORY));
        };
        GateDecision::Proceed { program, repo_root }
    }

    async fn run_hook(
        &self,
        program: &Path,
        repo_root: &Path,
        target: &Path,
        content: Vec<u8>,
    ) -> ValidationOutcome {
        let staged = match stage_temp_file(repo_root, &self.settings.temp_dir, target, &content).await {
            Ok(staged) => staged,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to stage file for validation");
                return ValidationOutcome::reject(
                    content,
                    vec![format!("Failed to prepare validation file: {e}")],
                );
            }
        };
        let relative = staged
            .path()
            .strip_prefix(repo_root)
            .unwrap_or(staged.path())
            .to_path_buf();

        let first = match self.invoke(program, repo_root, &relative, self.settings.run_timeout).await {
            Ok(out) => out,
            Err(message) => return ValidationOutcome::reject(content, vec![message]),
        };
        if first.timed_out {
            tracing::warn!(path = %target.display(), "Validation hook timed out");
            return ValidationOutcome::reject(content, vec![ERR_TIMEOUT.to_string()]);
        }
        let on_disk = tokio::fs::read(staged.path())
            .await
            .unwrap_or_else(|_| content.clone());
        if first.success() {
            return ValidationOutcome::pass(on_disk, None);
        }

        let mut errors = diagnostics(&first);
        tracing::warn!(path = %target.display(), exit_code = ?first.exit_code, "Validation hook failed");
        if on_disk == content {
            return ValidationOutcome::reject(content, errors);
        }

        // The hook rewrote the file: persist its version and check it once more.
        if let Err(e) = tokio::fs::write(staged.path(), &on_disk).await {
            errors.push(format!("Failed to stage autofixed content: {e}"));
            return ValidationOutcome::reject(content, errors);
        }
        let recheck = match self
            .invoke(program, repo_root, &relative, self.settings.recheck_timeout)
            .await
        {
            Ok(out) => out,
            Err(message) => {
                errors.push(message);
                return ValidationOutcome::reject(content, errors);
            }
        };
        if recheck.timed_out {
            tracing::warn!(path = %target.display(), "Validation hook recheck timed out");
            errors.push(ERR_RECHECK_TIMEOUT.to_string());
            return ValidationOutcome::reject(content, errors);
        }
        if recheck.success() {
            let fixed = tokio::fs::read(staged.path()).await.unwrap_or(on_disk);
            tracing::info!(path = %target.display(), "Validation hook autofix accepted");
            return ValidationOutcome {
                valid: true,
                errors: vec![NOTE_AUTOFIXED.to_string()],
                modified_content: fixed,
            };
        }
        errors.extend(diagnostics(&recheck));
        ValidationOutcome::reject(content, errors)
    }

    async fn invoke(
        &self,
        program: &Path,
        repo_root: &Path,
        relative: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutput, String> {
        let request = ProcessRequest::new("validation", program, repo_root)
            .args(self.settings.args.iter())
            .args([relative.as_os_str()])
            .timeout(timeout)
            .max_output_bytes(self.settings.max_output_bytes);
        run_with_timeout(request, &self.env).await.map_err(|e| {
            tracing::warn!(error = %e, "Validation hook could not run");
            format!("Validation hook failed to run: {e}")
        })
    }
}

/// Nearest ancestor of `target` (starting from its nearest existing ancestor)
/// that contains `marker`.
fn find_repo_root(target: &Path, marker: &str) -> Option<PathBuf> {
    let mut dir = target.parent()?;
    while !dir.exists() {
        dir = dir.parent()?;
    }
    dir.ancestors()
        .find(|candidate| candidate.join(marker).exists())
        .map(Path::to_path_buf)
}

/// Copy `content` into a fresh temp file under `<repo_root>/<temp_dir>`,
/// keeping the target's extension. Runs on the blocking pool.
async fn stage_temp_file(
    repo_root: &Path,
    temp_dir: &str,
    target: &Path,
    content: &[u8],
) -> io::Result<tempfile::NamedTempFile> {
    let dir = repo_root.join(temp_dir);
    let suffix = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let content = content.to_vec();
    tokio::task::spawn_blocking(move || -> io::Result<tempfile::NamedTempFile> {
        std::fs::create_dir_all(&dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("validate-")
            .suffix(&suffix)
            .tempfile_in(&dir)?;
        file.write_all(&content)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(io::Error::other)?
}

fn diagnostics(out: &ProcessOutput) -> Vec<String> {
    let mut errors: Vec<String> = [out.stdout_lossy(), out.stderr_lossy()]
        .into_iter()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();
    if errors.is_empty() {
        errors.push(match out.exit_code {
            Some(code) => format!("Validation hook failed with exit code {code}"),
            None => "Validation hook terminated by signal".to_string(),
        });
    }
    errors
}
