//! Git executor and the `git` tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::process::{ProcessOutput, ProcessRequest, run_with_timeout};
use super::sandbox::ResolvedPath;
use super::{EnvSanitizer, ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args};
use crate::config::default_true;

/// Variables that would redirect git away from the sandboxed repository.
pub const DEFAULT_GIT_ENV_DENYLIST: &[&str] = &[
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_NAMESPACE",
    "GIT_COMMON_DIR",
];

const DEFAULT_GIT_OUTPUT_BYTES: usize = 2_000_000;
const DEFAULT_HISTORY_LIMIT: u32 = 20;

#[derive(Debug, Clone)]
pub struct GitSettings {
    pub timeout: Duration,
    pub env_denylist: Vec<String>,
    pub max_output_bytes: usize,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            env_denylist: DEFAULT_GIT_ENV_DENYLIST
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_output_bytes: DEFAULT_GIT_OUTPUT_BYTES,
        }
    }
}

/// Runs git subcommands with a scrubbed environment and bounded output.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    timeout: Duration,
    env: EnvSanitizer,
    max_output_bytes: usize,
}

impl GitExecutor {
    pub fn new(settings: &GitSettings) -> Result<Self, ToolError> {
        Ok(Self {
            timeout: settings.timeout,
            env: EnvSanitizer::new(&settings.env_denylist)?,
            max_output_bytes: settings.max_output_bytes.max(1),
        })
    }

    /// `run(args, cwd, timeout) -> {exit_code, stdout, stderr}`.
    ///
    /// A timeout kills the process group and fails with `Timeout`.
    pub async fn run(
        &self,
        subcommand_args: &[String],
        cwd: &Path,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ToolError> {
        let bare_name = if cfg!(windows) { "git.exe" } else { "git" };
        let git_bin = which::which(bare_name).map_err(|_| ToolError::ExecutionFailed {
            tool: "git".to_string(),
            message: format!("{bare_name} not found in PATH"),
        })?;

        let mut args: Vec<String> = vec![
            "--no-pager".into(),
            "-c".into(),
            "color.ui=false".into(),
            "-c".into(),
            format!("core.hooksPath={}", git_hooks_disabled_path()),
        ];
        // External diff drivers and textconv filters can run arbitrary programs.
        match subcommand_args.split_first() {
            Some((cmd, rest)) if matches!(cmd.as_str(), "diff" | "log" | "show") => {
                args.push(cmd.clone());
                args.extend(["--no-ext-diff".into(), "--no-textconv".into()]);
                args.extend(rest.iter().cloned());
            }
            _ => args.extend(subcommand_args.iter().cloned()),
        }

        let timeout = timeout.unwrap_or(self.timeout);
        let request = ProcessRequest::new("git", git_bin, cwd)
            .args(args)
            .timeout(timeout)
            .max_output_bytes(self.max_output_bytes);
        let out = run_with_timeout(request, &self.env).await?;
        if out.timed_out {
            tracing::warn!(?subcommand_args, ?timeout, "git command timed out");
            return Err(ToolError::Timeout {
                tool: "git".to_string(),
                elapsed: out.elapsed,
            });
        }
        Ok(out)
    }
}

fn git_hooks_disabled_path() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GitAction {
    Status,
    Stage,
    Unstage,
    Commit,
    Diff,
    History,
    Restore,
    Fetch,
    Pull,
    Push,
    MergeAbort,
}

impl GitAction {
    const ALL: [&'static str; 11] = [
        "status",
        "stage",
        "unstage",
        "commit",
        "diff",
        "history",
        "restore",
        "fetch",
        "pull",
        "push",
        "merge_abort",
    ];

    fn from_action_str(s: &str) -> Option<Self> {
        match s {
            "status" => Some(Self::Status),
            "stage" | "add" => Some(Self::Stage),
            "unstage" => Some(Self::Unstage),
            "commit" => Some(Self::Commit),
            "diff" => Some(Self::Diff),
            "history" | "log" => Some(Self::History),
            "restore" => Some(Self::Restore),
            "fetch" => Some(Self::Fetch),
            "pull" => Some(Self::Pull),
            "push" => Some(Self::Push),
            "merge_abort" => Some(Self::MergeAbort),
            _ => None,
        }
    }

    fn is_side_effecting(self) -> bool {
        !matches!(self, Self::Status | Self::Diff | Self::History)
    }
}

#[derive(Debug, Deserialize)]
struct GitStatusArgs {
    #[serde(default = "default_true")]
    untracked: bool,
}

#[derive(Debug, Deserialize)]
struct GitPathsArgs {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    all: bool,
}

#[derive(Debug, Deserialize)]
struct GitCommitArgs {
    message: String,
    #[serde(default)]
    amend: bool,
    #[serde(default)]
    allow_empty: bool,
    author: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitDiffArgs {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    staged: bool,
    #[serde(default)]
    name_only: bool,
    #[serde(default)]
    stat: bool,
    commit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHistoryArgs {
    limit: Option<u32>,
    #[serde(default = "default_true")]
    oneline: bool,
    #[serde(default)]
    paths: Vec<String>,
    author: Option<String>,
    since: Option<String>,
    until: Option<String>,
    grep: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitRestoreArgs {
    paths: Vec<String>,
    #[serde(default)]
    staged: bool,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitRemoteArgs {
    remote: Option<String>,
    branch: Option<String>,
    #[serde(default)]
    all: bool,
    #[serde(default)]
    prune: bool,
    #[serde(default = "default_true")]
    tags: bool,
    #[serde(default)]
    rebase: bool,
    #[serde(default)]
    ff_only: bool,
    strategy: Option<String>,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    set_upstream: bool,
    #[serde(default)]
    dry_run: bool,
}

/// Parsed `git status --short --branch` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub branch: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
    pub deleted: Vec<String>,
    pub renamed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitEntry {
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub message: String,
}

struct GitTool;

impl GitTool {
    fn parse_action(args: &Value) -> Result<GitAction, ToolError> {
        let action = args
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::BadArgs {
                message: "missing required field: action".to_string(),
            })?;
        GitAction::from_action_str(action).ok_or_else(|| ToolError::BadArgs {
            message: format!("unknown git action: {action}"),
        })
    }
}

fn git_tool_schema() -> Value {
    let mut props = serde_json::Map::new();

    props.insert("action".into(), json!({ "type": "string", "enum": GitAction::ALL, "description": "Git operation to run" }));
    props.insert("repo_path".into(), json!({ "type": "string", "description": "Repository directory relative to the root (default: root)" }));
    props.insert("paths".into(), json!({ "type": "array", "items": { "type": "string" }, "description": "[stage/unstage/diff/history/restore] Paths relative to the repository" }));
    props.insert("all".into(), json!({ "type": "boolean", "default": false, "description": "[stage/unstage] All changes; [fetch] all remotes" }));
    props.insert("untracked".into(), json!({ "type": "boolean", "default": true, "description": "[status] Include untracked files" }));
    props.insert("message".into(), json!({ "type": "string", "description": "[commit] Commit message" }));
    props.insert("amend".into(), json!({ "type": "boolean", "default": false, "description": "[commit] Amend the last commit" }));
    props.insert("allow_empty".into(), json!({ "type": "boolean", "default": false, "description": "[commit] Allow an empty commit" }));
    props.insert("author".into(), json!({ "type": "string", "description": "[commit] Override author; [history] filter by author" }));
    props.insert("staged".into(), json!({ "type": "boolean", "default": false, "description": "[diff] Staged changes; [restore] restore the index" }));
    props.insert("name_only".into(), json!({ "type": "boolean", "default": false, "description": "[diff] Only file names" }));
    props.insert("stat".into(), json!({ "type": "boolean", "default": false, "description": "[diff] Diffstat" }));
    props.insert("commit".into(), json!({ "type": "string", "description": "[diff] Compare against this commit" }));
    props.insert("limit".into(), json!({ "type": "integer", "minimum": 1, "description": "[history] Maximum commits (default 20)" }));
    props.insert("oneline".into(), json!({ "type": "boolean", "default": true, "description": "[history] Compact hash + subject" }));
    props.insert("since".into(), json!({ "type": "string", "description": "[history] After date" }));
    props.insert("until".into(), json!({ "type": "string", "description": "[history] Before date" }));
    props.insert("grep".into(), json!({ "type": "string", "description": "[history] Filter by message pattern" }));
    props.insert("source".into(), json!({ "type": "string", "description": "[restore] Restore from this tree-ish" }));
    props.insert("remote".into(), json!({ "type": "string", "description": "[fetch/pull/push] Remote name (default: origin)" }));
    props.insert("branch".into(), json!({ "type": "string", "description": "[fetch/pull/push] Branch" }));
    props.insert("prune".into(), json!({ "type": "boolean", "default": false, "description": "[fetch] Prune deleted remote branches" }));
    props.insert("tags".into(), json!({ "type": "boolean", "description": "[fetch] Fetch tags (default true); [push] push tags" }));
    props.insert("rebase".into(), json!({ "type": "boolean", "default": false, "description": "[pull] Rebase instead of merge" }));
    props.insert("ff_only".into(), json!({ "type": "boolean", "default": false, "description": "[pull] Fast-forward only" }));
    props.insert("strategy".into(), json!({ "type": "string", "description": "[pull] Merge strategy" }));
    props.insert("force".into(), json!({ "type": "boolean", "default": false, "description": "[push] Force push" }));
    props.insert("set_upstream".into(), json!({ "type": "boolean", "default": false, "description": "[push] Set upstream tracking reference" }));
    props.insert("dry_run".into(), json!({ "type": "boolean", "default": false, "description": "[push] Dry run" }));

    json!({
        "type": "object",
        "required": ["action"],
        "properties": Value::Object(props)
    })
}

impl ToolExecutor for GitTool {
    fn name(&self) -> &'static str {
        "git"
    }

    fn description(&self) -> &'static str {
        "Git version control inside the root directory. Actions: status, stage, unstage, \
         commit (message required), diff, history, restore (paths required, discards changes), \
         fetch, pull, push, merge_abort."
    }

    fn schema(&self) -> Value {
        git_tool_schema()
    }

    fn is_side_effecting(&self, args: &Value) -> bool {
        Self::parse_action(args).map_or(true, GitAction::is_side_effecting)
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let action = Self::parse_action(args)?;
        let repo = args.get("repo_path").and_then(Value::as_str).unwrap_or(".");
        Ok(format!("git {action:?} in {repo}"))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let action = Self::parse_action(&args)?;
            let repo = resolve_repo_dir(ctx, &args)?;
            let mut payload = match action {
                GitAction::Status => handle_status(ctx, &repo, &args).await?,
                GitAction::Stage => handle_stage(ctx, &repo, &args).await?,
                GitAction::Unstage => handle_unstage(ctx, &repo, &args).await?,
                GitAction::Commit => handle_commit(ctx, &repo, &args).await?,
                GitAction::Diff => handle_diff(ctx, &repo, &args).await?,
                GitAction::History => handle_history(ctx, &repo, &args).await?,
                GitAction::Restore => handle_restore(ctx, &repo, &args).await?,
                GitAction::Fetch => handle_fetch(ctx, &repo, &args).await?,
                GitAction::Pull => handle_pull(ctx, &repo, &args).await?,
                GitAction::Push => handle_push(ctx, &repo, &args).await?,
                GitAction::MergeAbort => handle_merge_abort(ctx, &repo).await?,
            };
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("repo_path".into(), json!(repo.display_relative()));
            }
            Ok(payload)
        })
    }
}

pub fn register_git_tool(registry: &mut super::ToolRegistry) -> Result<(), ToolError> {
    registry.register(Box::new(GitTool))
}

fn resolve_repo_dir(ctx: &ToolCtx, args: &Value) -> Result<ResolvedPath, ToolError> {
    let raw = args.get("repo_path").and_then(Value::as_str).unwrap_or(".");
    let resolved = ctx.sandbox.resolve(raw)?;
    if !resolved.as_path().is_dir() {
        return Err(ToolError::NotADirectory {
            path: resolved.display_relative(),
        });
    }
    Ok(resolved)
}

/// Refuse values that git would parse as options.
fn reject_option_like(field: &str, value: &str) -> Result<(), ToolError> {
    if value.starts_with('-') {
        return Err(ToolError::BadArgs {
            message: format!("{field} must not start with '-': {value}"),
        });
    }
    Ok(())
}

fn push_paths(cmd: &mut Vec<String>, paths: &[String]) {
    if !paths.is_empty() {
        cmd.push("--".to_string());
        cmd.extend(paths.iter().cloned());
    }
}

async fn run(ctx: &ToolCtx, repo: &ResolvedPath, cmd: Vec<String>) -> Result<ProcessOutput, ToolError> {
    tracing::debug!(args = ?cmd, repo = %repo, "Running git");
    ctx.git.run(&cmd, repo.as_path(), None).await
}

fn failure(verb: &str, out: &ProcessOutput) -> ToolError {
    let stderr = out.stderr_lossy();
    let detail = if stderr.trim().is_empty() {
        out.stdout_lossy()
    } else {
        stderr
    };
    ToolError::ExecutionFailed {
        tool: "git".to_string(),
        message: format!("Failed to {verb}: {}", detail.trim()),
    }
}

async fn handle_status(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitStatusArgs = parse_args(args)?;
    let mut cmd = vec!["status".to_string(), "--short".to_string(), "--branch".to_string()];
    if !typed.untracked {
        cmd.push("--untracked-files=no".to_string());
    }
    let out = run(ctx, repo, cmd).await?;
    if !out.success() {
        return Err(failure("get status", &out));
    }
    let output = out.stdout_lossy();
    Ok(json!({
        "message": "Status retrieved successfully",
        "output": output,
        "status": parse_status(&output),
    }))
}

async fn handle_stage(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitPathsArgs = parse_args(args)?;
    let mut cmd = vec!["add".to_string()];
    if typed.all {
        cmd.push("-A".to_string());
    } else if typed.paths.is_empty() {
        return Err(ToolError::BadArgs {
            message: "Must specify paths or set all=true".to_string(),
        });
    } else {
        push_paths(&mut cmd, &typed.paths);
    }
    let out = run(ctx, repo, cmd).await?;
    if !out.success() {
        return Err(failure("stage files", &out));
    }
    Ok(json!({
        "message": "Files staged successfully",
        "paths": if typed.all { vec!["all".to_string()] } else { typed.paths },
    }))
}

async fn handle_unstage(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitPathsArgs = parse_args(args)?;
    let mut cmd = vec!["reset".to_string(), "HEAD".to_string()];
    if !typed.all {
        if typed.paths.is_empty() {
            return Err(ToolError::BadArgs {
                message: "Must specify paths or set all=true".to_string(),
            });
        }
        push_paths(&mut cmd, &typed.paths);
    }
    let out = run(ctx, repo, cmd).await?;
    // `reset` exits 1 when it only reports remaining unstaged changes.
    if out.exit_code.is_none_or(|code| code > 1) {
        return Err(failure("unstage files", &out));
    }
    Ok(json!({
        "message": "Files unstaged successfully",
        "paths": if typed.all { vec!["all".to_string()] } else { typed.paths },
    }))
}

async fn handle_commit(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitCommitArgs = parse_args(args)?;
    if typed.message.trim().is_empty() {
        return Err(ToolError::BadArgs {
            message: "commit message must not be empty".to_string(),
        });
    }
    let mut cmd = vec!["commit".to_string(), "-m".to_string(), typed.message];
    if typed.amend {
        cmd.push("--amend".to_string());
    }
    if typed.allow_empty {
        cmd.push("--allow-empty".to_string());
    }
    if let Some(author) = typed.author {
        cmd.push(format!("--author={author}"));
    }
    let out = run(ctx, repo, cmd).await?;
    let stdout = out.stdout_lossy();
    if !out.success() {
        if stdout.contains("nothing to commit") {
            return Ok(json!({
                "message": "Nothing to commit, working tree clean",
                "output": stdout,
            }));
        }
        return Err(failure("commit", &out));
    }
    Ok(json!({
        "message": "Successfully created commit",
        "commit_hash": parse_commit_hash(&stdout),
        "output": stdout,
    }))
}

async fn handle_diff(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitDiffArgs = parse_args(args)?;
    let mut cmd = vec!["diff".to_string()];
    if typed.staged {
        cmd.push("--cached".to_string());
    }
    if typed.name_only {
        cmd.push("--name-only".to_string());
    }
    if typed.stat {
        cmd.push("--stat".to_string());
    }
    if let Some(commit) = typed.commit {
        reject_option_like("commit", &commit)?;
        cmd.push(commit);
    }
    push_paths(&mut cmd, &typed.paths);

    let out = run(ctx, repo, cmd).await?;
    if !out.success() {
        return Err(failure("get diff", &out));
    }
    let diff = out.stdout_lossy();
    let message = if diff.is_empty() {
        "No differences found"
    } else {
        "Diff generated successfully"
    };
    Ok(json!({
        "message": message,
        "diff": diff,
        "type": if typed.staged { "staged" } else { "working" },
        "truncated": out.stdout_truncated,
    }))
}

async fn handle_history(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitHistoryArgs = parse_args(args)?;
    let limit = typed.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
    let mut cmd = vec!["log".to_string(), format!("-{limit}")];
    if typed.oneline {
        cmd.push("--oneline".to_string());
    } else {
        cmd.push("--pretty=format:%H|%an|%ae|%ad|%s".to_string());
        cmd.push("--date=iso".to_string());
    }
    for (flag, value) in [
        ("--author", typed.author),
        ("--since", typed.since),
        ("--until", typed.until),
        ("--grep", typed.grep),
    ] {
        if let Some(value) = value {
            cmd.push(format!("{flag}={value}"));
        }
    }
    push_paths(&mut cmd, &typed.paths);

    let out = run(ctx, repo, cmd).await?;
    if !out.success() {
        if out.stderr_lossy().contains("does not have any commits") {
            return Ok(json!({
                "message": "No commits found",
                "commits": [],
                "limit": limit,
            }));
        }
        return Err(failure("get history", &out));
    }
    let commits = parse_history(&out.stdout_lossy(), typed.oneline);
    Ok(json!({
        "message": format!("Found {} commit(s)", commits.len()),
        "commits": commits,
        "limit": limit,
    }))
}

async fn handle_restore(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitRestoreArgs = parse_args(args)?;
    if typed.paths.is_empty() {
        return Err(ToolError::BadArgs {
            message: "Must specify paths to restore".to_string(),
        });
    }
    let mut cmd = vec!["restore".to_string()];
    if typed.staged {
        cmd.push("--staged".to_string());
    }
    if let Some(source) = typed.source {
        reject_option_like("source", &source)?;
        cmd.push(format!("--source={source}"));
    }
    push_paths(&mut cmd, &typed.paths);

    let out = run(ctx, repo, cmd).await?;
    if !out.success() {
        return Err(failure("restore files", &out));
    }
    Ok(json!({
        "message": "Files restored successfully",
        "paths": typed.paths,
        "staged": typed.staged,
    }))
}

fn remote_and_branch(typed: &GitRemoteArgs) -> Result<(String, Option<String>), ToolError> {
    let remote = typed.remote.clone().unwrap_or_else(|| "origin".to_string());
    reject_option_like("remote", &remote)?;
    if let Some(branch) = &typed.branch {
        reject_option_like("branch", branch)?;
    }
    Ok((remote, typed.branch.clone()))
}

/// Ref update lines from fetch/push progress output.
fn ref_updates(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.contains("->") || line.contains("new tag") || line.contains("new branch"))
        .map(|line| line.trim().to_string())
        .collect()
}

async fn handle_fetch(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitRemoteArgs = parse_args(args)?;
    let (remote, branch) = remote_and_branch(&typed)?;
    let mut cmd = vec!["fetch".to_string()];
    if typed.all {
        cmd.push("--all".to_string());
    } else {
        cmd.push(remote.clone());
        cmd.extend(branch);
    }
    if typed.prune {
        cmd.push("--prune".to_string());
    }
    cmd.push(if typed.tags { "--tags" } else { "--no-tags" }.to_string());

    let out = run(ctx, repo, cmd).await?;
    if !out.success() {
        return Err(failure("fetch", &out));
    }
    let progress = out.stderr_lossy();
    Ok(json!({
        "message": "Fetch completed successfully",
        "remote": if typed.all { "all".to_string() } else { remote },
        "updates": ref_updates(&progress),
        "output": if progress.trim().is_empty() { "Already up to date".to_string() } else { progress },
    }))
}

async fn handle_pull(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitRemoteArgs = parse_args(args)?;
    let (remote, branch) = remote_and_branch(&typed)?;
    let mut cmd = vec!["pull".to_string()];
    if typed.rebase {
        cmd.push("--rebase".to_string());
    }
    if typed.ff_only {
        cmd.push("--ff-only".to_string());
    }
    if let Some(strategy) = &typed.strategy {
        reject_option_like("strategy", strategy)?;
        cmd.push(format!("--strategy={strategy}"));
    }
    cmd.push(remote.clone());
    cmd.extend(branch.clone());

    let out = run(ctx, repo, cmd).await?;
    let stdout = out.stdout_lossy();
    if !out.success() {
        let combined = format!("{stdout}{}", out.stderr_lossy());
        if combined.to_lowercase().contains("conflict") {
            return Err(ToolError::ExecutionFailed {
                tool: "git".to_string(),
                message: format!(
                    "Pull failed due to conflicts. Resolve conflicts and commit.\n{}",
                    combined.trim()
                ),
            });
        }
        return Err(failure("pull", &out));
    }
    let stats = parse_change_stats(&stdout);
    Ok(json!({
        "message": "Pull completed successfully",
        "remote": remote,
        "branch": branch.unwrap_or_else(|| "current".to_string()),
        "files_changed": stats.0,
        "insertions": stats.1,
        "deletions": stats.2,
        "output": stdout,
    }))
}

async fn handle_push(ctx: &ToolCtx, repo: &ResolvedPath, args: &Value) -> Result<Value, ToolError> {
    let typed: GitRemoteArgs = parse_args(args)?;
    let (remote, branch) = remote_and_branch(&typed)?;
    let push_tags = args.get("tags").and_then(Value::as_bool).unwrap_or(false);
    let mut cmd = vec!["push".to_string()];
    if typed.force {
        cmd.push("--force".to_string());
    }
    if typed.set_upstream {
        cmd.push("--set-upstream".to_string());
    }
    if push_tags {
        cmd.push("--tags".to_string());
    }
    if typed.dry_run {
        cmd.push("--dry-run".to_string());
    }
    cmd.push(remote.clone());
    cmd.extend(branch.clone());

    let out = run(ctx, repo, cmd).await?;
    if !out.success() {
        return Err(failure("push", &out));
    }
    let progress = out.stderr_lossy();
    let branch = branch.unwrap_or_else(|| "current".to_string());
    if progress.contains("Everything up-to-date") {
        return Ok(json!({
            "message": "Everything up-to-date",
            "remote": remote,
            "branch": branch,
            "status": "up-to-date",
        }));
    }
    Ok(json!({
        "message": "Push completed successfully",
        "remote": remote,
        "branch": branch,
        "pushed_refs": ref_updates(&progress),
        "dry_run": typed.dry_run,
        "output": if progress.trim().is_empty() { out.stdout_lossy() } else { progress },
    }))
}

async fn handle_merge_abort(ctx: &ToolCtx, repo: &ResolvedPath) -> Result<Value, ToolError> {
    let out = run(ctx, repo, vec!["merge".to_string(), "--abort".to_string()]).await?;
    if !out.success() {
        if out.stderr_lossy().contains("There is no merge to abort") {
            return Ok(json!({
                "message": "No merge in progress",
                "status": "clean",
            }));
        }
        return Err(failure("abort merge", &out));
    }
    Ok(json!({
        "message": "Successfully aborted merge",
        "status": "aborted",
    }))
}

// ============================================================================
// Output parsing
// ============================================================================

/// Parse `git status --short --branch`.
#[must_use]
pub fn parse_status(output: &str) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for line in output.lines() {
        if let Some(branch_line) = line.strip_prefix("## ") {
            let (name, tracking) = match branch_line.split_once(' ') {
                Some((name, rest)) => (name, rest),
                None => (branch_line, ""),
            };
            let name = name.split("...").next().unwrap_or(name);
            summary.branch = Some(name.to_string());
            summary.ahead = bracket_count(tracking, "ahead ");
            summary.behind = bracket_count(tracking, "behind ");
            continue;
        }
        let (Some(code), Some(path)) = (line.get(..2), line.get(3..)) else {
            continue;
        };
        let path = path.trim().to_string();
        let mut chars = code.chars();
        let (index, worktree) = (chars.next().unwrap_or(' '), chars.next().unwrap_or(' '));

        if code == "??" {
            summary.untracked.push(path);
            continue;
        }
        if matches!(index, 'A' | 'M') {
            summary.staged.push(path.clone());
        }
        if worktree == 'M' {
            summary.modified.push(path.clone());
        }
        if index == 'D' || worktree == 'D' {
            summary.deleted.push(path.clone());
        }
        if index == 'R' {
            summary.renamed.push(path);
        }
    }
    summary
}

fn bracket_count(tracking: &str, label: &str) -> u32 {
    tracking
        .split(label)
        .nth(1)
        .and_then(|rest| {
            rest.split(|c: char| !c.is_ascii_digit())
                .next()
                .and_then(|n| n.parse().ok())
        })
        .unwrap_or(0)
}

/// Short hash from the `[branch abc1234] subject` summary line.
#[must_use]
pub fn parse_commit_hash(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let inner = line.strip_prefix('[')?.split(']').next()?;
        inner.split_whitespace().last().map(ToString::to_string)
    })
}

#[must_use]
pub fn parse_history(output: &str, oneline: bool) -> Vec<CommitEntry> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            if oneline {
                let (hash, message) = line.split_once(' ').unwrap_or((line, ""));
                return Some(CommitEntry {
                    hash: hash.to_string(),
                    author: None,
                    email: None,
                    date: None,
                    message: message.to_string(),
                });
            }
            let mut parts = line.splitn(5, '|');
            let (hash, author, email, date, message) =
                (parts.next()?, parts.next()?, parts.next()?, parts.next()?, parts.next()?);
            Some(CommitEntry {
                hash: hash.to_string(),
                author: Some(author.to_string()),
                email: Some(email.to_string()),
                date: Some(date.to_string()),
                message: message.to_string(),
            })
        })
        .collect()
}

/// `(files_changed, insertions, deletions)` from a diffstat summary line.
fn parse_change_stats(output: &str) -> (u64, u64, u64) {
    let mut stats = (0, 0, 0);
    for line in output.lines().filter(|l| l.contains("changed")) {
        let words: Vec<&str> = line.split_whitespace().collect();
        for pair in words.windows(2) {
            let Ok(n) = pair[0].parse::<u64>() else {
                continue;
            };
            if pair[1].starts_with("file") {
                stats.0 = n;
            } else if pair[1].starts_with("insertion") {
                stats.1 = n;
            } else if pair[1].starts_with("deletion") {
                stats.2 = n;
            }
        }
    }
    stats
}

/// Path of the git binary, if installed.
#[must_use]
pub fn git_binary() -> Option<PathBuf> {
    which::which(if cfg!(windows) { "git.exe" } else { "git" }).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_branch_and_codes() {
        let output = "## main...origin/main [ahead 2, behind 1]\nM  staged.rs\n M dirty.rs\nA  new.rs\n D gone.rs\nR  old.rs -> new_name.rs\n?? scratch.txt\n";
        let status = parse_status(output);
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert_eq!(status.ahead, 2);
        assert_eq!(status.behind, 1);
        assert_eq!(status.staged, vec!["staged.rs", "new.rs"]);
        assert_eq!(status.modified, vec!["dirty.rs"]);
        assert_eq!(status.deleted, vec!["gone.rs"]);
        assert_eq!(status.renamed, vec!["old.rs -> new_name.rs"]);
        assert_eq!(status.untracked, vec!["scratch.txt"]);
    }

    #[test]
    fn status_without_upstream() {
        let status = parse_status("## No commits yet on main\n");
        assert_eq!(status.branch.as_deref(), Some("No"));
        let status = parse_status("## feature\n");
        assert_eq!(status.branch.as_deref(), Some("feature"));
        assert_eq!(status.ahead, 0);
    }

    #[test]
    fn commit_hash_from_summary_line() {
        assert_eq!(
            parse_commit_hash("[main 1a2b3c4] Add thing\n 1 file changed\n").as_deref(),
            Some("1a2b3c4")
        );
        assert_eq!(
            parse_commit_hash("[main (root-commit) 9f8e7d6] init\n").as_deref(),
            Some("9f8e7d6")
        );
        assert_eq!(parse_commit_hash("nothing here"), None);
    }

    #[test]
    fn history_formats() {
        let oneline = parse_history("abc123 First\ndef456 Second commit\n", true);
        assert_eq!(oneline.len(), 2);
        assert_eq!(oneline[1].message, "Second commit");

        let full = parse_history("h1|Ann|ann@x.io|2024-01-01 10:00:00 +0000|Fix | pipes\n", false);
        assert_eq!(full[0].author.as_deref(), Some("Ann"));
        assert_eq!(full[0].message, "Fix | pipes");
    }

    #[test]
    fn change_stats_from_pull_output() {
        let stats = parse_change_stats(" 3 files changed, 10 insertions(+), 2 deletions(-)\n");
        assert_eq!(stats, (3, 10, 2));
        assert_eq!(parse_change_stats("Already up to date.\n"), (0, 0, 0));
    }

    #[test]
    fn option_like_values_rejected() {
        assert!(reject_option_like("remote", "--upload-pack=evil").is_err());
        assert!(reject_option_like("remote", "origin").is_ok());
    }

    #[test]
    fn action_aliases() {
        assert_eq!(GitAction::from_action_str("add"), Some(GitAction::Stage));
        assert_eq!(GitAction::from_action_str("log"), Some(GitAction::History));
        assert_eq!(GitAction::from_action_str("rebase"), None);
        assert!(!GitAction::Status.is_side_effecting());
        assert!(GitAction::Push.is_side_effecting());
    }
}
