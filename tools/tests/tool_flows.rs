//! End-to-end tool calls through the registry.
//!
//! Every call goes through `ToolRegistry::dispatch`, so schema validation,
//! sandbox resolution, the validation gate and atomic persistence all run
//! the way a client sees them.

use std::path::Path;
use std::process::Command;

use filesys_tools::{ToolCtx, ToolRegistry, ToolSettings, ValidationSettings, default_registry};
use serde_json::{Value, json};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    ctx: ToolCtx,
    registry: ToolRegistry,
}

impl Harness {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(tweak: impl FnOnce(&mut ToolSettings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = ToolSettings::for_root(dir.path());
        tweak(&mut settings);
        Self {
            ctx: ToolCtx::from_settings(&settings).unwrap(),
            registry: default_registry().unwrap(),
            dir,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    async fn call(&self, tool: &str, args: Value) -> Value {
        self.registry.dispatch(tool, args, &self.ctx).await
    }
}

/// A hook that runs `sh -c <script> hook <staged file>` from the repo root.
fn hook_settings(script: &str) -> ValidationSettings {
    ValidationSettings {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "hook".to_string()],
        config_file: None,
        skip_on_missing: false,
        ..ValidationSettings::default()
    }
}

#[tokio::test]
async fn write_read_modify_replace_round() {
    let h = Harness::new();

    let out = h.call("write", json!({"path": "notes/a.txt", "content": "hello"})).await;
    assert_eq!(out["bytes_written"], 5, "{out}");

    let out = h.call("read", json!({"path": "notes/a.txt"})).await;
    assert_eq!(out["content"], "hello");

    let out = h
        .call(
            "modify",
            json!({
                "path": "notes/a.txt",
                "start_offset_inclusive": 0,
                "end_offset_inclusive": 0,
                "new_content": "bye",
                "offset_type": "line"
            }),
        )
        .await;
    assert!(out.get("error").is_none(), "{out}");
    assert_eq!(std::fs::read_to_string(h.root().join("notes/a.txt")).unwrap(), "bye\n");

    let out = h
        .call("replace", json!({"path": "notes/a.txt", "old_content": "bye", "new_content": "hi"}))
        .await;
    assert_eq!(out["replacements"], 1);
    assert_eq!(std::fs::read_to_string(h.root().join("notes/a.txt")).unwrap(), "hi\n");
}

#[tokio::test]
async fn written_bytes_read_back_unchanged() {
    let h = Harness::new();
    let content = "line one\n\ttabbed \u{00e9}\n\nlast";
    h.call("write", json!({"path": "round.txt", "content": content})).await;
    let out = h.call("read", json!({"path": "round.txt"})).await;
    assert_eq!(out["content"], content);

    let out = h
        .call("write", json!({"path": "raw.bin", "content": "3q2+7w==", "input_format": "base64", "mode": "binary"}))
        .await;
    assert_eq!(out["bytes_written"], 4, "{out}");
    let out = h.call("read", json!({"path": "raw.bin", "output_format": "base64"})).await;
    assert_eq!(out["content"], "3q2+7w==");
}

#[tokio::test]
async fn escapes_are_refused_before_touching_disk() {
    let h = Harness::new();
    for path in ["../escape.txt", "/etc/passwd", "a/../../escape.txt"] {
        let out = h.call("write", json!({"path": path, "content": "x"})).await;
        assert_eq!(out["kind"], "outside_root", "{path}: {out}");
    }
    assert!(!h.root().parent().unwrap().join("escape.txt").exists());

    let out = h.call("read", json!({"path": "../../etc/hostname"})).await;
    assert_eq!(out["kind"], "outside_root");
}

#[tokio::test]
async fn protected_directories_cannot_be_touched() {
    let h = Harness::new();
    std::fs::create_dir(h.root().join(".venv")).unwrap();

    let out = h.call("create", json!({"paths": [".git/hooks"]})).await;
    assert_eq!(out["errors"][0]["kind"], "protected_directory", "{out}");
    assert!(!h.root().join(".git").exists());

    let out = h.call("delete", json!({"paths": [".venv"]})).await;
    assert_eq!(out["errors"][0]["kind"], "protected_directory", "{out}");
    assert!(h.root().join(".venv").exists());

    let out = h.call("write", json!({"path": "node_modules/x.js", "content": "x"})).await;
    assert_eq!(out["kind"], "protected_directory");

    // Reads stay allowed.
    std::fs::write(h.root().join(".venv/pyvenv.cfg"), "home = /usr\n").unwrap();
    let out = h.call("read", json!({"path": ".venv/pyvenv.cfg"})).await;
    assert_eq!(out["content"], "home = /usr\n");
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_protected_directories_cannot_be_touched() {
    let h = Harness::new();
    std::fs::create_dir(h.root().join(".git")).unwrap();
    std::os::unix::fs::symlink(h.root().join(".git"), h.root().join("gitlink")).unwrap();

    let out = h.call("write", json!({"path": "gitlink/hooks_pre", "content": "evil"})).await;
    assert_eq!(out["kind"], "protected_directory", "{out}");
    assert!(!h.root().join(".git/hooks_pre").exists());

    let out = h.call("create", json!({"paths": ["gitlink/hooks"]})).await;
    assert_eq!(out["errors"][0]["kind"], "protected_directory", "{out}");
    assert!(!h.root().join(".git/hooks").exists());

    let out = h.call("delete", json!({"paths": ["gitlink"]})).await;
    assert_eq!(out["errors"][0]["kind"], "protected_directory", "{out}");
    assert!(h.root().join(".git").is_dir());
}

#[cfg(unix)]
#[tokio::test]
async fn failing_hook_blocks_the_write() {
    let h = Harness::with(|s| {
        s.validation = hook_settings("echo 'E501 line too long' >&2; exit 1");
    });
    std::fs::create_dir(h.root().join(".git")).unwrap();

    let out = h.call("write", json!({"path": "bad.py", "content": "x = 1\n"})).await;
    assert_eq!(out["kind"], "validation_failed", "{out}");
    assert_eq!(out["validation_errors"][0], "E501 line too long");
    assert!(!h.root().join("bad.py").exists());

    // Non-source files bypass the hook.
    let out = h.call("write", json!({"path": "notes.txt", "content": "free text"})).await;
    assert_eq!(out["bytes_written"], 9, "{out}");

    // So does an explicit opt-out.
    let out = h
        .call("write", json!({"path": "bad.py", "content": "x = 1\n", "validate": false}))
        .await;
    assert!(out.get("error").is_none(), "{out}");
    assert!(h.root().join("bad.py").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn hook_rewrite_replaces_the_payload() {
    let h = Harness::with(|s| {
        s.validation = hook_settings(
            r#"if [ "$(cat "$1")" != "fixed = 1" ]; then printf 'fixed = 1\n' > "$1"; exit 1; fi"#,
        );
    });
    std::fs::create_dir(h.root().join(".git")).unwrap();

    let out = h.call("write", json!({"path": "fix.py", "content": "fixed=1"})).await;
    assert!(out.get("error").is_none(), "{out}");
    assert!(
        out["validation_notes"]
            .as_array()
            .is_some_and(|notes| !notes.is_empty()),
        "{out}"
    );
    assert_eq!(std::fs::read_to_string(h.root().join("fix.py")).unwrap(), "fixed = 1\n");
}

#[tokio::test]
async fn missing_hook_is_reported_when_not_skipped() {
    let h = Harness::with(|s| {
        s.validation = ValidationSettings {
            program: "filesys-no-such-hook".to_string(),
            skip_on_missing: false,
            ..ValidationSettings::default()
        };
    });
    let out = h.call("write", json!({"path": "m.py", "content": "x = 1\n"})).await;
    assert_eq!(out["kind"], "hook_unavailable", "{out}");
    assert!(!h.root().join("m.py").exists());
}

#[tokio::test]
async fn find_and_list_see_written_files() {
    let h = Harness::new();
    h.call("write", json!({"path": "src/lib.rs", "content": "pub fn needle() {}\n"})).await;
    h.call("write", json!({"path": "src/main.rs", "content": "fn main() {}\n"})).await;

    let out = h.call("find", json!({"keywords_file_content": ["needle"]})).await;
    assert_eq!(out["matches"], json!(["src/lib.rs"]), "{out}");

    let out = h.call("list", json!({"path": "src", "pattern": "*.rs"})).await;
    assert_eq!(out["total_found"], 2, "{out}");
}

#[tokio::test]
async fn git_stage_commit_history() {
    if filesys_tools::git::git_binary().is_none() {
        eprintln!("git not installed; skipping");
        return;
    }
    let h = Harness::with(|s| s.validation.enabled = false);
    let git = |args: &[&str]| {
        let status = Command::new("git")
            .args(args)
            .current_dir(h.root())
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?}");
    };
    git(&["init", "-q"]);
    git(&["config", "user.email", "dev@example.com"]);
    git(&["config", "user.name", "Dev"]);

    h.call("write", json!({"path": "README.md", "content": "# demo\n"})).await;
    let out = h.call("git", json!({"action": "status"})).await;
    assert_eq!(out["status"]["untracked"], json!(["README.md"]), "{out}");

    let out = h.call("git", json!({"action": "stage", "paths": ["README.md"]})).await;
    assert!(out.get("error").is_none(), "{out}");
    let out = h.call("git", json!({"action": "commit", "message": "Add readme"})).await;
    assert!(out["commit_hash"].is_string(), "{out}");

    let out = h.call("git", json!({"action": "commit", "message": "Again"})).await;
    assert_eq!(out["message"], "Nothing to commit, working tree clean");

    let out = h.call("git", json!({"action": "history"})).await;
    assert_eq!(out["commits"].as_array().map(Vec::len), Some(1), "{out}");
}
