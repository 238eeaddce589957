//! filesys - JSON-lines tool server.
//!
//! Reads one request per line from stdin and writes one response per line to
//! stdout:
//!
//! ```text
//! {"id": 1, "tool": "read", "args": {"path": "src/lib.rs"}}
//! {"id": 1, "result": {"path": "src/lib.rs", "content": "...", ...}}
//! ```
//!
//! Requests run concurrently, so responses may come back out of order; the
//! `id` is echoed unchanged. Logs go to `~/.filesys/logs/filesys.log` because
//! stdout belongs to the protocol.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};
use std::{
    env,
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use filesys_config::FilesysConfig;
use filesys_tools::{PythonPool, ToolCtx, ToolError, ToolRegistry, default_registry};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than corrupt the protocol stream.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!("Failed to create log dir {}: {e}", parent.display()));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!("Failed to open log file {}: {e}", candidate.display()));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.filesys/logs/filesys.log
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".filesys").join("logs").join("filesys.log"));
    }

    // Fallback: ./.filesys/logs/filesys.log
    candidates.push(PathBuf::from(".filesys").join("logs").join("filesys.log"));

    candidates
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    tool: String,
    #[serde(default = "empty_args")]
    args: Value,
}

fn empty_args() -> Value {
    json!({})
}

/// Dispatch one request line and render the response line.
async fn handle_line(line: &str, registry: Arc<ToolRegistry>, ctx: Arc<ToolCtx>) -> String {
    let response = match serde_json::from_str::<Request>(line) {
        Ok(Request { id, tool, args }) => {
            let name = tool.clone();
            // A separate task so a panicking executor becomes an error payload.
            let task = tokio::spawn(async move { registry.dispatch(&tool, args, &ctx).await });
            let result = match task.await {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(tool = %name, error = %err, "Tool task aborted");
                    ToolError::ExecutionFailed {
                        tool: name,
                        message: format!("tool task aborted: {err}"),
                    }
                    .to_payload()
                }
            };
            json!({ "id": id, "result": result })
        }
        Err(err) => {
            tracing::warn!(error = %err, "Malformed request line");
            let payload = ToolError::BadArgs {
                message: format!("Invalid request: {err}"),
            }
            .to_payload();
            json!({ "id": Value::Null, "result": payload })
        }
    };
    response.to_string()
}

async fn write_responses(mut rx: mpsc::UnboundedReceiver<String>) -> std::io::Result<()> {
    let mut out = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = match FilesysConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            tracing::warn!(path = %err.path().display(), "Using default configuration: {err}");
            FilesysConfig::default()
        }
    };
    let settings = config.to_settings();
    let registry = Arc::new(default_registry()?);

    if env::args().any(|arg| arg == "--list-tools") {
        println!("{}", serde_json::to_string_pretty(&registry.definitions())?);
        return Ok(());
    }

    let base = ToolCtx::from_settings(&settings)?;
    let pool = Arc::new(PythonPool::new(Arc::clone(&base.python), &settings.python));
    pool.start()?;
    let ctx = Arc::new(base.with_pool(Arc::clone(&pool)));
    tracing::info!(
        root = %ctx.sandbox.root().display(),
        tools = registry.definitions().len(),
        "filesys ready"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_responses(rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let registry = Arc::clone(&registry);
        let ctx = Arc::clone(&ctx);
        let tx = tx.clone();
        in_flight.spawn(async move {
            let response = handle_line(&line, registry, ctx).await;
            let _ = tx.send(response);
        });
    }

    while in_flight.join_next().await.is_some() {}
    drop(tx);
    writer.await??;

    pool.shutdown();
    tracing::info!("stdin closed; shutting down");
    Ok(())
}
