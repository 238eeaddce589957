//! Shared subprocess management: bounded capture, timeouts, process-group kill.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time;

use super::{EnvSanitizer, ToolError};

/// Grace period for a killed child to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Wrap a spawned child immediately after `spawn()` so a cancelled future
/// cannot leak it. Call `disarm()` once the process has exited normally.
pub struct ChildGuard {
    child: tokio::process::Child,
    armed: bool,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: tokio::process::Child) -> Self {
        Self { child, armed: true }
    }

    pub fn child_mut(&mut self) -> &mut tokio::process::Child {
        &mut self.child
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                #[allow(clippy::cast_possible_wrap)]
                let pgid = pid as i32;
                // SAFETY: killpg has no memory-safety preconditions.
                unsafe {
                    if libc::killpg(pgid, libc::SIGKILL) == -1 {
                        let _ = self.child.start_kill();
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
        let _ = self.child.try_wait();
    }
}

/// Run the child in its own session so the whole group can be killed.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: only async-signal-safe libc calls run between fork and exec.
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Replace the inherited environment with its sanitized copy.
pub fn apply_sanitized_env(cmd: &mut Command, sanitizer: &EnvSanitizer) {
    let env: Vec<(String, String)> = std::env::vars().collect();
    cmd.env_clear();
    cmd.envs(sanitizer.sanitize_env(&env));
}

/// One subprocess invocation.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub tool: &'static str,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl ProcessRequest {
    pub fn new(tool: &'static str, program: impl Into<PathBuf>, cwd: impl AsRef<Path>) -> Self {
        Self {
            tool,
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max.max(1);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Spawn, capture bounded output, and enforce the timeout.
///
/// A timeout is not an error here: the child's group is killed and the
/// partial output is returned with `timed_out` set.
pub async fn run_with_timeout(
    request: ProcessRequest,
    sanitizer: &EnvSanitizer,
) -> Result<ProcessOutput, ToolError> {
    let tool = request.tool;
    let failed = |message: String| ToolError::ExecutionFailed {
        tool: tool.to_string(),
        message,
    };

    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .current_dir(&request.cwd)
        .kill_on_drop(true);
    apply_sanitized_env(&mut cmd, sanitizer);
    #[cfg(unix)]
    set_new_session(&mut cmd);

    let started = Instant::now();
    let child = cmd.spawn().map_err(|e| {
        failed(format!(
            "failed to spawn {}: {e}",
            request.program.display()
        ))
    })?;
    let mut guard = ChildGuard::new(child);
    tracing::debug!(tool, program = %request.program.display(), pid = ?guard.child_mut().id(), "Spawned subprocess");

    let stdout = guard
        .child_mut()
        .stdout
        .take()
        .ok_or_else(|| failed("failed to capture stdout".to_string()))?;
    let stderr = guard
        .child_mut()
        .stderr
        .take()
        .ok_or_else(|| failed("failed to capture stderr".to_string()))?;

    let stdout_task = tokio::spawn(read_to_end_limited(stdout, request.max_output_bytes));
    let stderr_task = tokio::spawn(read_to_end_limited(stderr, request.max_output_bytes));

    let mut timed_out = false;
    let status = match time::timeout(request.timeout, guard.child_mut().wait()).await {
        Ok(res) => Some(res.map_err(|e| failed(e.to_string()))?),
        Err(_) => {
            timed_out = true;
            tracing::warn!(tool, timeout = ?request.timeout, "Subprocess timed out, killing");
            kill_group(&mut guard);
            match time::timeout(KILL_GRACE, guard.child_mut().wait()).await {
                Ok(res) => Some(res.map_err(|e| failed(e.to_string()))?),
                Err(_) => {
                    return Err(failed(format!(
                        "timed out after {} ms and did not terminate",
                        request.timeout.as_millis()
                    )));
                }
            }
        }
    };
    guard.disarm();

    // Grandchildren may hold the pipes open; don't wait on them forever.
    let (stdout, stdout_truncated) = time::timeout(KILL_GRACE, stdout_task)
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();
    let (stderr, stderr_truncated) = time::timeout(KILL_GRACE, stderr_task)
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();

    Ok(ProcessOutput {
        exit_code: status.and_then(|s| s.code()),
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed: started.elapsed(),
    })
}

fn kill_group(guard: &mut ChildGuard) {
    #[cfg(unix)]
    if let Some(pid) = guard.child_mut().id() {
        #[allow(clippy::cast_possible_wrap)]
        let pgid = pid as i32;
        // SAFETY: killpg has no memory-safety preconditions.
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = guard.child_mut().start_kill();
}

/// Read up to `max_bytes`, then keep draining so the child never blocks on a full pipe.
pub async fn read_to_end_limited<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = max_bytes.saturating_sub(buf.len());
        let take = remaining.min(n);
        buf.extend_from_slice(&tmp[..take]);
        if take < n {
            truncated = true;
        }
    }

    (buf, truncated)
}
