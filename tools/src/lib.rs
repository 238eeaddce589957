//! Sandboxed filesystem tool framework: error model, registry, per-request
//! context, and the tool executors built on top of them.

pub mod builtins;
pub mod codec;
pub mod config;
pub mod edit;
pub mod extract;
pub mod git;
pub mod offsets;
pub mod process;
pub mod python;
pub mod sandbox;
pub mod search;
pub mod validation;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use filesys_types::SourceExtensions;
use serde::Serialize;
use serde_json::{Value, json};

pub use config::{FileLimits, ToolSettings};
pub use extract::Extractor;
pub use git::{GitExecutor, GitSettings};
pub use python::{Interpreter, PythonCommand, PythonPool, PythonRunner, PythonSettings, TaskState};
pub use sandbox::{ProtectedPathPolicy, ResolvedPath, Sandbox};
pub use search::{ParallelSearcher, SearchQuery, SearchService, SearchToolConfig};
pub use validation::{ValidationGate, ValidationSettings};

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

// ============================================================================
// Errors
// ============================================================================

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("{0}")]
    SandboxViolation(DenialReason),
    #[error("Path not found: {path}")]
    NotFound { path: String },
    #[error("Not a file: {path}")]
    NotAFile { path: String },
    #[error("Not a directory: {path}")]
    NotADirectory { path: String },
    #[error("File too large: {path} ({size} bytes, limit {max} bytes)")]
    TooLarge { path: String, size: u64, max: u64 },
    #[error("Range out of bounds: {message}")]
    RangeOutOfBounds { message: String },
    #[error("Unsupported format: {message}")]
    UnsupportedFormat { message: String },
    #[error("Unsupported operation: {message}")]
    UnsupportedOperation { message: String },
    #[error("Validation failed: {}", errors.join("; "))]
    ValidationFailed { errors: Vec<String> },
    #[error("{message}")]
    HookUnavailable { message: String },
    #[error("Tool timed out: {tool} after {}s", elapsed.as_secs())]
    Timeout { tool: String, elapsed: Duration },
    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
}

impl ToolError {
    /// Stable snake_case tag for the error class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadArgs { .. } => "bad_args",
            Self::SandboxViolation(reason) => reason.kind(),
            Self::NotFound { .. } => "not_found",
            Self::NotAFile { .. } => "not_a_file",
            Self::NotADirectory { .. } => "not_a_directory",
            Self::TooLarge { .. } => "too_large",
            Self::RangeOutOfBounds { .. } => "range_out_of_bounds",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::UnsupportedOperation { .. } => "unsupported_operation",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::HookUnavailable { .. } => "hook_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::DuplicateTool { .. } => "duplicate_tool",
        }
    }

    /// `{"error", "kind"}`, plus `validation_errors` for a blocked write.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({ "error": self.to_string(), "kind": self.kind() });
        if let Self::ValidationFailed { errors } = self {
            payload["validation_errors"] = json!(errors);
        }
        payload
    }

    pub(crate) fn from_io(path: impl fmt::Display, err: std::io::Error) -> Self {
        let path = path.to_string();
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound { path },
            ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            ErrorKind::NotADirectory => Self::NotADirectory { path },
            ErrorKind::IsADirectory => Self::NotAFile { path },
            _ => Self::ExecutionFailed {
                tool: "io".to_string(),
                message: format!("{path}: {err}"),
            },
        }
    }
}

/// Why the sandbox refused a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    OutsideRoot {
        attempted: String,
    },
    /// An absolute path that names neither root nor a descendant of it.
    Unmappable {
        attempted: String,
        root: PathBuf,
    },
    ProtectedDirectory {
        attempted: String,
        segment: String,
    },
    InvalidPath {
        attempted: String,
        message: String,
    },
}

impl DenialReason {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutsideRoot { .. } | Self::Unmappable { .. } => "outside_root",
            Self::ProtectedDirectory { .. } => "protected_directory",
            Self::InvalidPath { .. } => "invalid_path",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::OutsideRoot { attempted } => {
                write!(f, "Path '{attempted}' is outside the allowed root directory")
            }
            DenialReason::Unmappable { attempted, root } => write!(
                f,
                "Absolute path '{attempted}' cannot be mapped to root directory '{}'",
                root.display()
            ),
            DenialReason::ProtectedDirectory { attempted, segment } => write!(
                f,
                "Cannot modify '{attempted}': '{segment}' is a protected directory"
            ),
            DenialReason::InvalidPath { attempted, message } => {
                write!(f, "Invalid file path '{attempted}': {message}")
            }
        }
    }
}

// ============================================================================
// Executors and registry
// ============================================================================

/// A named, schema-described tool.
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn is_side_effecting(&self, args: &Value) -> bool;
    /// One-line description of a call, for logs.
    fn summary(&self, args: &Value) -> Result<String, ToolError>;
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    if let Err(err) = validator.validate(args) {
        return Err(ToolError::BadArgs {
            message: err.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn ToolExecutor, ToolError> {
        self.executors
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .executors
            .values()
            .map(|exec| ToolDefinition {
                name: exec.name().to_string(),
                description: exec.description().to_string(),
                parameters: exec.schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run one call. Failures come back as error payloads, never as `Err`.
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolCtx) -> Value {
        match self.try_dispatch(name, args, ctx).await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(tool = name, kind = err.kind(), error = %err, "Tool call failed");
                err.to_payload()
            }
        }
    }

    async fn try_dispatch(&self, name: &str, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let executor = self.lookup(name)?;
        validate_args(&executor.schema(), &args)?;
        let summary = executor.summary(&args).unwrap_or_else(|_| name.to_string());
        tracing::info!(
            tool = name,
            summary = %summary,
            side_effecting = executor.is_side_effecting(&args),
            "Dispatching tool call"
        );
        executor.execute(args, ctx).await
    }
}

/// Registry with every tool this crate ships.
pub fn default_registry() -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::default();
    builtins::register_builtins(&mut registry)?;
    Ok(registry)
}

// ============================================================================
// Context
// ============================================================================

/// Shared, read-only state handed to every tool call.
///
/// Cloning is cheap; everything heavy sits behind an `Arc`.
#[derive(Clone)]
pub struct ToolCtx {
    pub sandbox: Arc<Sandbox>,
    pub extensions: Arc<ExtensionTable>,
    pub limits: FileLimits,
    pub gate: Arc<ValidationGate>,
    pub search: Arc<dyn SearchService>,
    pub git: Arc<GitExecutor>,
    pub python: Arc<PythonRunner>,
    pub python_pool: Option<Arc<PythonPool>>,
    pub extractor: Option<Arc<dyn Extractor>>,
}

impl ToolCtx {
    pub fn from_settings(settings: &ToolSettings) -> Result<Self, ToolError> {
        let sandbox = Arc::new(Sandbox::new(&settings.root, settings.protected_dirs.clone())?);
        let search = ParallelSearcher::new(SearchToolConfig {
            max_file_size_bytes: settings.limits.max_file_size_bytes,
            ..settings.search.clone()
        });
        let python = PythonRunner::new(Arc::clone(&sandbox), &settings.python);
        let hook_env = EnvSanitizer::new(&settings.git.env_denylist)?;
        tracing::debug!(root = %sandbox.root().display(), "Tool context ready");
        Ok(Self {
            extensions: Arc::new(ExtensionTable::new(settings.source_extensions.clone())),
            limits: settings.limits,
            gate: Arc::new(ValidationGate::new(settings.validation.clone(), hook_env)),
            search: Arc::new(search),
            git: Arc::new(GitExecutor::new(&settings.git)?),
            python: Arc::new(python),
            python_pool: None,
            extractor: None,
            sandbox,
        })
    }

    /// Share an extension table whose `replace` is seen by later requests.
    #[must_use]
    pub fn with_extensions(mut self, extensions: Arc<ExtensionTable>) -> Self {
        self.extensions = extensions;
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn SearchService>) -> Self {
        self.search = search;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: Arc<PythonPool>) -> Self {
        self.python_pool = Some(pool);
        self
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }
}

/// Swappable source-extension table.
///
/// Readers take a snapshot; replacing builds a new table and swaps the
/// reference, so an in-flight request keeps the table it started with.
#[derive(Debug, Default)]
pub struct ExtensionTable {
    current: RwLock<Arc<SourceExtensions>>,
}

impl ExtensionTable {
    #[must_use]
    pub fn new(extensions: SourceExtensions) -> Self {
        Self {
            current: RwLock::new(Arc::new(extensions)),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<SourceExtensions> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, extensions: SourceExtensions) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(extensions);
    }
}

// ============================================================================
// Subprocess environment
// ============================================================================

/// Strips denylisted variables from a child's environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSanitizer {
    denylist: globset::GlobSet,
}

impl EnvSanitizer {
    pub fn new(patterns: &[String]) -> Result<Self, ToolError> {
        let mut builder = globset::GlobSetBuilder::new();
        for pat in patterns {
            let mut glob = globset::GlobBuilder::new(pat);
            // Variable names are matched regardless of case.
            glob.case_insensitive(true);
            let glob = glob.build().map_err(|e| ToolError::BadArgs {
                message: format!("Invalid env denylist pattern '{pat}': {e}"),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| ToolError::BadArgs {
            message: format!("Invalid env denylist: {e}"),
        })?;
        Ok(Self { denylist: set })
    }

    #[must_use]
    pub fn sanitize_env(&self, env: &[(String, String)]) -> Vec<(String, String)> {
        env.iter()
            .filter(|(k, _)| !self.denylist.is_match(k))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_sanitizer_strips_git_redirects() {
        let sanitizer = EnvSanitizer::new(
            &git::DEFAULT_GIT_ENV_DENYLIST
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
        )
        .unwrap();
        let env = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("GIT_DIR".to_string(), "/elsewhere/.git".to_string()),
            ("git_work_tree".to_string(), "/elsewhere".to_string()),
            ("HOME".to_string(), "/home/test".to_string()),
        ];
        let keys: Vec<String> = sanitizer.sanitize_env(&env).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["PATH", "HOME"]);
        assert_eq!(EnvSanitizer::default().sanitize_env(&env).len(), 4);
    }

    #[test]
    fn sandbox_denials_share_outside_root_kind() {
        let outside = ToolError::SandboxViolation(DenialReason::OutsideRoot {
            attempted: "../x".to_string(),
        });
        let unmappable = ToolError::SandboxViolation(DenialReason::Unmappable {
            attempted: "/etc/passwd".to_string(),
            root: PathBuf::from("/tmp/x"),
        });
        assert_eq!(outside.kind(), "outside_root");
        assert_eq!(unmappable.kind(), "outside_root");
        assert_eq!(
            outside.to_string(),
            "Path '../x' is outside the allowed root directory"
        );
        assert!(unmappable.to_string().contains("cannot be mapped to root directory '/tmp/x'"));
    }

    #[test]
    fn validation_payload_lists_errors() {
        let err = ToolError::ValidationFailed {
            errors: vec!["E501 line too long".to_string()],
        };
        let payload = err.to_payload();
        assert_eq!(payload["kind"], "validation_failed");
        assert_eq!(payload["validation_errors"][0], "E501 line too long");
        assert!(payload["error"].as_str().unwrap().contains("E501"));
    }

    #[test]
    fn io_errors_map_to_taxonomy() {
        let err = ToolError::from_io("a.txt", std::io::Error::from(ErrorKind::NotFound));
        assert_eq!(err.kind(), "not_found");
        let err = ToolError::from_io("a.txt", std::io::Error::from(ErrorKind::PermissionDenied));
        assert_eq!(err.kind(), "permission_denied");
        let err = ToolError::from_io("a.txt", std::io::Error::other("disk on fire"));
        assert_eq!(err.kind(), "execution_failed");
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown_names() {
        let mut registry = default_registry().unwrap();
        let err = builtins::register_builtins(&mut registry).unwrap_err();
        assert_eq!(err.kind(), "duplicate_tool");
        assert_eq!(registry.lookup("teleport").err().unwrap().kind(), "unknown_tool");

        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["create", "delete", "extract", "find", "git", "list", "modify", "python", "read", "replace", "write"]
        );
    }

    #[tokio::test]
    async fn dispatch_turns_failures_into_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolCtx::from_settings(&ToolSettings::for_root(dir.path())).unwrap();
        let registry = default_registry().unwrap();

        let out = registry.dispatch("read", json!({}), &ctx).await;
        assert_eq!(out["kind"], "bad_args");
        let out = registry.dispatch("nope", json!({}), &ctx).await;
        assert_eq!(out["kind"], "unknown_tool");
        let out = registry.dispatch("read", json!({"path": "../etc/passwd"}), &ctx).await;
        assert_eq!(out["kind"], "outside_root");
    }

    #[tokio::test]
    async fn swapped_extension_table_reaches_next_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let table = Arc::new(ExtensionTable::new(SourceExtensions::new([".py"])));
        let ctx = ToolCtx::from_settings(&ToolSettings::for_root(dir.path()))
            .unwrap()
            .with_extensions(Arc::clone(&table));
        let registry = default_registry().unwrap();

        let out = registry.dispatch("read", json!({"path": "a.rs"}), &ctx).await;
        assert_eq!(out["line_numbers"], false, "{out}");

        table.replace(SourceExtensions::new([".rs"]));
        let out = registry.dispatch("read", json!({"path": "a.rs"}), &ctx).await;
        assert_eq!(out["line_numbers"], true, "{out}");
    }

    #[test]
    fn extension_table_swaps_whole_value() {
        let table = ExtensionTable::new(SourceExtensions::new([".rs"]));
        let before = table.snapshot();
        table.replace(SourceExtensions::new([".py"]));
        assert!(before.is_source(std::path::Path::new("a.rs")));
        assert!(!table.snapshot().is_source(std::path::Path::new("a.rs")));
        assert!(table.snapshot().is_source(std::path::Path::new("a.py")));
    }
}
