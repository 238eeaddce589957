//! Python execution: a foreground runner and an owned background pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::process::{ProcessRequest, run_with_timeout};
use super::sandbox::Sandbox;
use super::{EnvSanitizer, ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args};

const PRELUDE_MODULES: [&str; 4] = ["sys", "os", "json", "datetime"];
const DEFAULT_PYTHON_OUTPUT_BYTES: usize = 4_000_000;
const DEFAULT_MAX_FINISHED_TASKS: usize = 256;

#[derive(Debug, Clone)]
pub struct PythonSettings {
    pub min_workers: usize,
    pub max_workers: usize,
    pub worker_acquire_timeout: Duration,
    pub execution_default_timeout: Duration,
    pub max_output_bytes: usize,
    /// Finished tasks kept for polling; older ones are dropped first.
    pub max_finished_tasks: usize,
}

impl Default for PythonSettings {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 5,
            worker_acquire_timeout: Duration::from_secs(30),
            execution_default_timeout: Duration::from_secs(300),
            max_output_bytes: DEFAULT_PYTHON_OUTPUT_BYTES,
            max_finished_tasks: DEFAULT_MAX_FINISHED_TASKS,
        }
    }
}

/// Which interpreter runs a command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Interpreter {
    System,
    /// `<root>/.venv`, falling back to the system interpreter.
    #[default]
    Venv,
    /// Directory (relative to root) that must contain `.venv`.
    Custom(String),
}

impl Interpreter {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "system" => Self::System,
            "venv" | "" => Self::Venv,
            other => Self::Custom(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PythonCommand {
    /// A script path inside root, or inline code.
    pub script: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub interpreter: Interpreter,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PythonRunResult {
    pub stdout: String,
    pub stderr: String,
    pub returncode: Option<i32>,
    pub success: bool,
    pub timeout: bool,
}

/// Builds and runs interpreter invocations confined to the sandbox root.
#[derive(Debug)]
pub struct PythonRunner {
    sandbox: Arc<Sandbox>,
    env: EnvSanitizer,
    default_timeout: Duration,
    max_output_bytes: usize,
}

impl PythonRunner {
    #[must_use]
    pub fn new(sandbox: Arc<Sandbox>, settings: &PythonSettings) -> Self {
        Self {
            sandbox,
            env: EnvSanitizer::default(),
            default_timeout: settings.execution_default_timeout,
            max_output_bytes: settings.max_output_bytes.max(1),
        }
    }

    /// Resolve cwd, interpreter and argv without spawning anything.
    pub fn prepare(&self, command: &PythonCommand) -> Result<ProcessRequest, ToolError> {
        let work_dir = match command.cwd.as_deref() {
            None | Some("") => self.sandbox.resolve(".")?,
            Some(cwd) => self.sandbox.resolve(cwd)?,
        };
        if !work_dir.as_path().is_dir() {
            return Err(ToolError::NotADirectory {
                path: work_dir.display_relative(),
            });
        }
        let python = self.interpreter_path(&command.interpreter)?;
        let args = self.build_argv(&command.script, &command.args)?;
        let timeout = command.timeout.unwrap_or(self.default_timeout);
        Ok(ProcessRequest::new("python", python, work_dir.as_path())
            .args(args)
            .timeout(timeout)
            .max_output_bytes(self.max_output_bytes))
    }

    pub async fn run(&self, command: &PythonCommand) -> Result<PythonRunResult, ToolError> {
        let request = self.prepare(command)?;
        execute(&self.env, request).await
    }

    fn interpreter_path(&self, interpreter: &Interpreter) -> Result<PathBuf, ToolError> {
        match interpreter {
            Interpreter::System => system_python(),
            Interpreter::Venv => {
                let candidate = venv_python(self.sandbox.root());
                if candidate.is_file() {
                    tracing::debug!(python = %candidate.display(), "Using venv interpreter");
                    Ok(candidate)
                } else {
                    system_python()
                }
            }
            Interpreter::Custom(dir) => {
                let base = self.sandbox.resolve(dir)?;
                let candidate = venv_python(base.as_path());
                if candidate.is_file() {
                    Ok(candidate)
                } else {
                    Err(ToolError::BadArgs {
                        message: format!("No .venv found in {}", base.display_relative()),
                    })
                }
            }
        }
    }

    fn build_argv(&self, script: &str, args: &[String]) -> Result<Vec<String>, ToolError> {
        if let Some(script_path) = self.script_file(script)? {
            let script_path = script_path.to_string_lossy().into_owned();
            let argv: Vec<String> = std::iter::once(&script_path)
                .chain(args)
                .map(|a| py_literal(a))
                .collect();
            let mut lines = vec!["import runpy".to_string(), "import pathlib".to_string()];
            lines.extend(PRELUDE_MODULES.iter().map(|m| format!("import {m}")));
            lines.push(format!("script_path = pathlib.Path({})", py_literal(&script_path)));
            lines.push(format!("sys.argv = [{}]", argv.join(", ")));
            lines.push(format!(
                "shared_globals = {{name: globals()[name] for name in ({},)}}",
                PRELUDE_MODULES.map(py_literal).join(", ")
            ));
            lines.push(
                "runpy.run_path(str(script_path), run_name=\"__main__\", init_globals=shared_globals)"
                    .to_string(),
            );
            return Ok(vec!["-c".to_string(), lines.join("\n")]);
        }

        let prelude = prelude_block();
        let code = if script.is_empty() {
            prelude
        } else if script.contains(&prelude) {
            script.to_string()
        } else {
            format!("{prelude}\n{script}")
        };
        let mut argv = vec!["-c".to_string(), code];
        argv.extend(args.iter().cloned());
        Ok(argv)
    }

    /// `Some(path)` when `script` names an existing file; it must lie inside root.
    fn script_file(&self, script: &str) -> Result<Option<PathBuf>, ToolError> {
        if script.is_empty() || script.contains('\n') {
            return Ok(None);
        }
        let raw = Path::new(script);
        let candidate = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.sandbox.root().join(raw)
        };
        if !candidate.is_file() {
            return Ok(None);
        }
        let canonical = candidate
            .canonicalize()
            .map_err(|e| ToolError::from_io(script, e))?;
        if !canonical.starts_with(self.sandbox.root()) {
            return Err(ToolError::BadArgs {
                message: "Script path must be within root directory".to_string(),
            });
        }
        Ok(Some(canonical))
    }
}

fn prelude_block() -> String {
    PRELUDE_MODULES
        .iter()
        .map(|m| format!("import {m}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// JSON string syntax is also a valid Python string literal.
fn py_literal(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn venv_python(base: &Path) -> PathBuf {
    if cfg!(windows) {
        base.join(".venv").join("Scripts").join("python.exe")
    } else {
        base.join(".venv").join("bin").join("python")
    }
}

fn system_python() -> Result<PathBuf, ToolError> {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .map_err(|_| ToolError::ExecutionFailed {
            tool: "python".to_string(),
            message: "no python interpreter found in PATH".to_string(),
        })
}

async fn execute(env: &EnvSanitizer, request: ProcessRequest) -> Result<PythonRunResult, ToolError> {
    let timeout = request.timeout;
    let out = run_with_timeout(request, env).await?;
    if out.timed_out {
        tracing::warn!(?timeout, "Python execution timed out");
    }
    Ok(PythonRunResult {
        success: out.success() && !out.timed_out,
        stdout: out.stdout_lossy(),
        stderr: out.stderr_lossy(),
        returncode: out.exit_code,
        timeout: out.timed_out,
    })
}

// ============================================================================
// Background pool
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub state: TaskState,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub result: Option<PythonRunResult>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct TaskEntry {
    snapshot: TaskSnapshot,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

type TaskTable = Arc<Mutex<HashMap<String, TaskEntry>>>;

/// Bounded pool of background interpreter runs.
///
/// Owned by whoever constructs it; nothing is started implicitly.
#[derive(Debug)]
pub struct PythonPool {
    runner: Arc<PythonRunner>,
    permits: Arc<Semaphore>,
    max_workers: usize,
    min_workers: usize,
    acquire_timeout: Duration,
    max_finished: usize,
    lifecycle: Mutex<Lifecycle>,
    tasks: TaskTable,
}

impl PythonPool {
    #[must_use]
    pub fn new(runner: Arc<PythonRunner>, settings: &PythonSettings) -> Self {
        let max_workers = settings.max_workers.max(1);
        Self {
            runner,
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            min_workers: settings.min_workers.min(max_workers),
            acquire_timeout: settings.worker_acquire_timeout,
            max_finished: settings.max_finished_tasks,
            lifecycle: Mutex::new(Lifecycle::Idle),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn start(&self) -> Result<(), ToolError> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match *lifecycle {
            Lifecycle::Stopped => Err(ToolError::UnsupportedOperation {
                message: "python pool has been shut down".to_string(),
            }),
            _ => {
                *lifecycle = Lifecycle::Running;
                tracing::info!(max_workers = self.max_workers, "Python pool started");
                Ok(())
            }
        }
    }

    /// Stop accepting work and cancel everything still queued or running.
    pub fn shutdown(&self) {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = Lifecycle::Stopped;
        self.permits.close();
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cancelled = 0usize;
        for entry in tasks.values_mut() {
            if cancel_entry(entry, "pool shut down") {
                cancelled += 1;
            }
        }
        tracing::info!(cancelled, "Python pool shut down");
    }

    pub fn submit(&self, command: PythonCommand) -> Result<String, ToolError> {
        if *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) != Lifecycle::Running {
            return Err(ToolError::UnsupportedOperation {
                message: "python pool is not running".to_string(),
            });
        }
        let request = self.runner.prepare(&command)?;
        let task_id = uuid::Uuid::new_v4().to_string();

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        prune_finished(&mut tasks, self.max_finished);
        tasks.insert(
            task_id.clone(),
            TaskEntry {
                snapshot: TaskSnapshot {
                    task_id: task_id.clone(),
                    state: TaskState::Queued,
                    created_at: now(),
                    started_at: None,
                    finished_at: None,
                    result: None,
                    error: None,
                },
                handle: None,
            },
        );

        let handle = tokio::spawn(run_task(
            Arc::clone(&self.runner),
            Arc::clone(&self.permits),
            self.acquire_timeout,
            Arc::clone(&self.tasks),
            task_id.clone(),
            request,
        ));
        // The task cannot touch its entry until this lock is released.
        if let Some(entry) = tasks.get_mut(&task_id) {
            entry.handle = Some(handle);
        }
        tracing::debug!(task_id, "Submitted python task");
        Ok(task_id)
    }

    pub fn poll(&self, task_id: &str) -> Result<TaskSnapshot, ToolError> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks
            .get(task_id)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| unknown_task(task_id))
    }

    /// Cancel a queued or running task; finished tasks are returned unchanged.
    pub fn cancel(&self, task_id: &str) -> Result<TaskSnapshot, ToolError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = tasks.get_mut(task_id).ok_or_else(|| unknown_task(task_id))?;
        if cancel_entry(entry, "cancelled by request") {
            tracing::info!(task_id, "Cancelled python task");
        }
        Ok(entry.snapshot.clone())
    }

    #[must_use]
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        prune_finished(&mut tasks, self.max_finished);
        let mut all: Vec<TaskSnapshot> = tasks.values().map(|e| e.snapshot.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.task_id.cmp(&b.task_id)));
        all
    }

    #[must_use]
    pub fn info(&self) -> Value {
        json!({
            "min_workers": self.min_workers,
            "max_workers": self.max_workers,
            "available_workers": self.permits.available_permits(),
        })
    }
}

impl Drop for PythonPool {
    fn drop(&mut self) {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in tasks.values() {
            if let Some(handle) = &entry.handle {
                handle.abort();
            }
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn unknown_task(task_id: &str) -> ToolError {
    ToolError::BadArgs {
        message: format!("Task {task_id} not found"),
    }
}

/// Returns whether the entry changed state.
fn cancel_entry(entry: &mut TaskEntry, reason: &str) -> bool {
    if entry.snapshot.state.is_terminal() {
        return false;
    }
    // Aborting drops the child guard, which kills the process group.
    if let Some(handle) = &entry.handle {
        handle.abort();
    }
    entry.snapshot.state = TaskState::Cancelled;
    entry.snapshot.finished_at = Some(now());
    entry.snapshot.error = Some(reason.to_string());
    true
}

/// Drop the oldest finished tasks beyond `keep`.
fn prune_finished(tasks: &mut HashMap<String, TaskEntry>, keep: usize) {
    let mut finished: Vec<_> = tasks
        .iter()
        .filter(|(_, entry)| entry.snapshot.state.is_terminal())
        .map(|(id, entry)| {
            let at = entry
                .snapshot
                .finished_at
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok());
            (at, id.clone())
        })
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        tasks.remove(&id);
    }
    tracing::debug!(dropped = excess, "Pruned finished python tasks");
}

fn update(tasks: &TaskTable, task_id: &str, apply: impl FnOnce(&mut TaskSnapshot)) {
    let mut tasks = tasks.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(entry) = tasks.get_mut(task_id)
        && !entry.snapshot.state.is_terminal()
    {
        apply(&mut entry.snapshot);
    }
}

async fn run_task(
    runner: Arc<PythonRunner>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    tasks: TaskTable,
    task_id: String,
    request: ProcessRequest,
) {
    let permit = match tokio::time::timeout(acquire_timeout, permits.acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            update(&tasks, &task_id, |s| {
                s.state = TaskState::Cancelled;
                s.finished_at = Some(now());
                s.error = Some("pool shut down".to_string());
            });
            return;
        }
        Err(_) => {
            tracing::warn!(task_id, ?acquire_timeout, "Timed out waiting for a python worker");
            update(&tasks, &task_id, |s| {
                s.state = TaskState::Failed;
                s.finished_at = Some(now());
                s.error = Some(format!(
                    "Timed out waiting for a worker after {}s",
                    acquire_timeout.as_secs()
                ));
            });
            return;
        }
    };

    update(&tasks, &task_id, |s| {
        s.state = TaskState::Running;
        s.started_at = Some(now());
    });
    let outcome = execute(&runner.env, request).await;
    drop(permit);

    update(&tasks, &task_id, |s| {
        s.finished_at = Some(now());
        match outcome {
            Ok(result) => {
                s.state = if result.timeout {
                    TaskState::TimedOut
                } else if result.success {
                    TaskState::Completed
                } else {
                    TaskState::Failed
                };
                s.result = Some(result);
            }
            Err(e) => {
                s.state = TaskState::Failed;
                s.error = Some(e.to_string());
            }
        }
    });
}

// ============================================================================
// Tool
// ============================================================================

#[derive(Debug, Deserialize)]
struct PythonToolArgs {
    action: String,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    cwd: Option<String>,
    python: Option<String>,
    timeout: Option<u64>,
    task_id: Option<String>,
}

impl PythonToolArgs {
    fn command(&self) -> Result<PythonCommand, ToolError> {
        let script = self.script.clone().ok_or_else(|| ToolError::BadArgs {
            message: format!("script is required for action {}", self.action),
        })?;
        Ok(PythonCommand {
            script,
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            interpreter: self.python.as_deref().map(Interpreter::parse).unwrap_or_default(),
            timeout: self.timeout.map(Duration::from_secs),
        })
    }

    fn task_id(&self) -> Result<&str, ToolError> {
        self.task_id.as_deref().ok_or_else(|| ToolError::BadArgs {
            message: format!("task_id is required for action {}", self.action),
        })
    }
}

struct PythonTool;

fn pool(ctx: &ToolCtx) -> Result<&PythonPool, ToolError> {
    ctx.python_pool
        .as_deref()
        .ok_or_else(|| ToolError::UnsupportedOperation {
            message: "background python execution is not enabled".to_string(),
        })
}

impl ToolExecutor for PythonTool {
    fn name(&self) -> &'static str {
        "python"
    }

    fn description(&self) -> &'static str {
        "Run Python code or a script inside the root directory. Actions: run (foreground), \
         run_background (returns task_id), task_status, task_cancel, list_tasks. \
         `python` selects the interpreter: system, venv (default) or a directory containing .venv."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["action"],
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["run", "run_background", "task_status", "task_cancel", "list_tasks"]
                },
                "script": { "type": "string", "description": "Script path inside root, or inline code" },
                "args": { "type": "array", "items": { "type": "string" } },
                "cwd": { "type": "string", "description": "Working directory relative to root" },
                "python": { "type": "string", "description": "system, venv, or a directory containing .venv" },
                "timeout": { "type": "integer", "minimum": 1, "description": "Seconds (default 300)" },
                "task_id": { "type": "string" }
            }
        })
    }

    fn is_side_effecting(&self, args: &Value) -> bool {
        matches!(
            args.get("action").and_then(Value::as_str),
            Some("run" | "run_background" | "task_cancel")
        )
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let action = args.get("action").and_then(Value::as_str).unwrap_or("run");
        Ok(format!("python {action}"))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PythonToolArgs = parse_args(&args)?;
            match typed.action.as_str() {
                "run" => {
                    let result = ctx.python.run(&typed.command()?).await?;
                    Ok(serde_json::to_value(result).unwrap_or(Value::Null))
                }
                "run_background" => {
                    let task_id = pool(ctx)?.submit(typed.command()?)?;
                    Ok(json!({
                        "task_id": task_id,
                        "status": "queued",
                        "message": format!("Python script submitted as background task {task_id}"),
                    }))
                }
                "task_status" => {
                    let snapshot = pool(ctx)?.poll(typed.task_id()?)?;
                    Ok(serde_json::to_value(snapshot).unwrap_or(Value::Null))
                }
                "task_cancel" => {
                    let snapshot = pool(ctx)?.cancel(typed.task_id()?)?;
                    Ok(serde_json::to_value(snapshot).unwrap_or(Value::Null))
                }
                "list_tasks" => {
                    let pool = pool(ctx)?;
                    let tasks = pool.list();
                    Ok(json!({
                        "total": tasks.len(),
                        "tasks": tasks,
                        "pool_info": pool.info(),
                    }))
                }
                other => Err(ToolError::BadArgs {
                    message: format!("unknown python action: {other}"),
                }),
            }
        })
    }
}

pub fn register_python_tool(registry: &mut super::ToolRegistry) -> Result<(), ToolError> {
    registry.register(Box::new(PythonTool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filesys_types::ProtectedDirectorySet;

    fn runner(dir: &Path) -> PythonRunner {
        let sandbox = Arc::new(Sandbox::new(dir, ProtectedDirectorySet::default()).unwrap());
        PythonRunner::new(sandbox, &PythonSettings::default())
    }

    fn has_python() -> bool {
        system_python().is_ok()
    }

    #[test]
    fn interpreter_parsing() {
        assert_eq!(Interpreter::parse("system"), Interpreter::System);
        assert_eq!(Interpreter::parse("venv"), Interpreter::Venv);
        assert_eq!(Interpreter::parse("tools/env"), Interpreter::Custom("tools/env".to_string()));
    }

    #[test]
    fn inline_code_gets_prelude_once() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        let argv = r.build_argv("print(1)", &["a".to_string()]).unwrap();
        assert_eq!(argv[0], "-c");
        assert!(argv[1].starts_with("import sys\nimport os\nimport json\nimport datetime\n"));
        assert!(argv[1].ends_with("print(1)"));
        assert_eq!(argv[2], "a");

        let with_prelude = format!("{}\nprint(2)", prelude_block());
        let argv = r.build_argv(&with_prelude, &[]).unwrap();
        assert_eq!(argv[1], with_prelude);
    }

    #[test]
    fn script_file_uses_runpy_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.py"), "print('hi')\n").unwrap();
        let r = runner(dir.path());
        let argv = r.build_argv("job.py", &["x\"y".to_string()]).unwrap();
        assert!(argv[1].contains("import runpy"));
        assert!(argv[1].contains(r#""x\"y""#));
        assert_eq!(argv.len(), 2);
    }

    #[test]
    fn script_outside_root_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("evil.py");
        std::fs::write(&outside, "print('x')\n").unwrap();
        let err = runner(root.path())
            .build_argv(outside.to_str().unwrap(), &[])
            .unwrap_err();
        assert!(err.to_string().contains("within root"));
    }

    #[test]
    fn cwd_must_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(dir.path())
            .prepare(&PythonCommand {
                script: "print(1)".to_string(),
                cwd: Some("../..".to_string()),
                interpreter: Interpreter::System,
                ..PythonCommand::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), "outside_root");
    }

    #[test]
    fn custom_interpreter_requires_venv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("proj")).unwrap();
        let err = runner(dir.path())
            .interpreter_path(&Interpreter::Custom("proj".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("No .venv found"));
    }

    #[tokio::test]
    async fn foreground_run_captures_output() {
        if !has_python() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let result = runner(dir.path())
            .run(&PythonCommand {
                script: "print(json.dumps({'ok': True}))".to_string(),
                interpreter: Interpreter::System,
                ..PythonCommand::default()
            })
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.stdout.trim(), r#"{"ok": true}"#);
    }

    #[tokio::test]
    async fn submit_requires_started_pool() {
        let dir = tempfile::tempdir().unwrap();
        let pool = PythonPool::new(Arc::new(runner(dir.path())), &PythonSettings::default());
        let cmd = PythonCommand {
            script: "print(1)".to_string(),
            ..PythonCommand::default()
        };
        assert_eq!(pool.submit(cmd.clone()).unwrap_err().kind(), "unsupported_operation");
        pool.start().unwrap();
        pool.shutdown();
        assert!(pool.submit(cmd).is_err());
        assert!(pool.start().is_err());
    }

    #[tokio::test]
    async fn background_task_completes_and_cancel_is_idempotent() {
        if !has_python() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let pool = PythonPool::new(Arc::new(runner(dir.path())), &PythonSettings::default());
        pool.start().unwrap();
        let id = pool
            .submit(PythonCommand {
                script: "print('bg')".to_string(),
                interpreter: Interpreter::System,
                ..PythonCommand::default()
            })
            .unwrap();

        let mut snapshot = pool.poll(&id).unwrap();
        for _ in 0..200 {
            if snapshot.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            snapshot = pool.poll(&id).unwrap();
        }
        assert_eq!(snapshot.state, TaskState::Completed);
        assert_eq!(snapshot.result.as_ref().unwrap().stdout.trim(), "bg");

        let after = pool.cancel(&id).unwrap();
        assert_eq!(after.state, TaskState::Completed);
        assert_eq!(pool.list().len(), 1);
        pool.shutdown();
    }

    fn entry(id: &str, state: TaskState, finished_at: Option<&str>) -> (String, TaskEntry) {
        (
            id.to_string(),
            TaskEntry {
                snapshot: TaskSnapshot {
                    task_id: id.to_string(),
                    state,
                    created_at: "2026-01-01T00:00:00+00:00".to_string(),
                    started_at: None,
                    finished_at: finished_at.map(ToString::to_string),
                    result: None,
                    error: None,
                },
                handle: None,
            },
        )
    }

    #[test]
    fn pruning_drops_oldest_finished_and_keeps_live_tasks() {
        let mut tasks: HashMap<String, TaskEntry> = [
            entry("old", TaskState::Completed, Some("2026-01-01T00:00:01+00:00")),
            entry("mid", TaskState::Failed, Some("2026-01-01T00:00:02.5+00:00")),
            entry("new", TaskState::Cancelled, Some("2026-01-01T00:00:03+00:00")),
            entry("live", TaskState::Running, None),
            entry("waiting", TaskState::Queued, None),
        ]
        .into_iter()
        .collect();

        prune_finished(&mut tasks, 1);
        let mut left: Vec<&str> = tasks.keys().map(String::as_str).collect();
        left.sort_unstable();
        assert_eq!(left, vec!["live", "new", "waiting"]);

        prune_finished(&mut tasks, 1);
        assert_eq!(tasks.len(), 3);
    }

    #[tokio::test]
    async fn list_caps_retained_finished_tasks() {
        if !has_python() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let settings = PythonSettings {
            max_finished_tasks: 2,
            ..PythonSettings::default()
        };
        let pool = PythonPool::new(Arc::new(runner(dir.path())), &settings);
        pool.start().unwrap();
        for _ in 0..4 {
            let id = pool
                .submit(PythonCommand {
                    script: "import time\ntime.sleep(30)".to_string(),
                    interpreter: Interpreter::System,
                    ..PythonCommand::default()
                })
                .unwrap();
            pool.cancel(&id).unwrap();
        }
        let listed = pool.list();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|t| t.state == TaskState::Cancelled));
        pool.shutdown();
    }

    #[tokio::test]
    async fn cancel_stops_running_task() {
        if !has_python() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let pool = PythonPool::new(Arc::new(runner(dir.path())), &PythonSettings::default());
        pool.start().unwrap();
        let id = pool
            .submit(PythonCommand {
                script: "import time\ntime.sleep(30)".to_string(),
                interpreter: Interpreter::System,
                ..PythonCommand::default()
            })
            .unwrap();
        let snapshot = pool.cancel(&id).unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.poll(&id).unwrap().state, TaskState::Cancelled);
        assert!(pool.poll("missing").is_err());
    }
}
