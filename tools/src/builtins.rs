//! Filesystem tool executors: read, write, modify, replace, delete, create, list, find.

use std::sync::Arc;

use filesys_types::{ContentMode, OffsetError, OffsetSpec, OffsetUnit, TransportFormat};
use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::{Value, json};

use super::codec::{self, SNIFF_BYTES};
use super::edit::{self, OccurrenceLimit};
use super::offsets::{self, ReadRequest, check_regular_file};
use super::sandbox::ResolvedPath;
use super::search::{SearchQuery, build_glob_set};
use super::validation::ERR_UNAVAILABLE;
use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, ToolRegistry, parse_args};
use crate::config::default_true;
use crate::{extract, git, python};

const fn default_end() -> i64 {
    -1
}

fn offset_error(e: OffsetError) -> ToolError {
    ToolError::BadArgs {
        message: e.to_string(),
    }
}

fn parse_unit(raw: Option<&str>) -> Result<OffsetUnit, ToolError> {
    raw.map_or(Ok(OffsetUnit::Line), |name| {
        OffsetUnit::parse(name).map_err(|e| ToolError::BadArgs {
            message: e.to_string(),
        })
    })
}

/// Decode a request payload; text mode additionally requires UTF-8.
fn decode_payload(
    payload: &str,
    format: TransportFormat,
    mode: ContentMode,
) -> Result<Vec<u8>, ToolError> {
    let bytes = codec::decode(payload, format)?;
    if mode == ContentMode::Text && std::str::from_utf8(&bytes).is_err() {
        return Err(ToolError::BadArgs {
            message: "decoded content is not valid UTF-8; use mode=binary".to_string(),
        });
    }
    Ok(bytes)
}

/// Prefix sniff, or full content that is not UTF-8 past the sniffed prefix.
fn looks_binary(bytes: &[u8]) -> bool {
    codec::sniff_binary(&bytes[..bytes.len().min(SNIFF_BYTES)]) || std::str::from_utf8(bytes).is_err()
}

/// Run the validation gate; returns the bytes to persist plus informational notes.
async fn gate_payload(
    ctx: &ToolCtx,
    path: &ResolvedPath,
    bytes: Vec<u8>,
    validate: bool,
) -> Result<(Vec<u8>, Vec<String>), ToolError> {
    if !validate {
        return Ok((bytes, Vec::new()));
    }
    let extensions = ctx.extensions.snapshot();
    let outcome = ctx.gate.validate(path.as_path(), bytes, &extensions).await;
    if outcome.valid {
        return Ok((outcome.modified_content, outcome.errors));
    }
    tracing::warn!(path = %path, errors = ?outcome.errors, "Write blocked by validation");
    if outcome.errors.len() == 1 && outcome.errors[0] == ERR_UNAVAILABLE {
        return Err(ToolError::HookUnavailable {
            message: ERR_UNAVAILABLE.to_string(),
        });
    }
    Err(ToolError::ValidationFailed {
        errors: outcome.errors,
    })
}

/// Atomically replace `path` with `bytes` on the blocking pool.
async fn persist(path: &ResolvedPath, bytes: Vec<u8>) -> Result<(), ToolError> {
    let target = path.as_path().to_path_buf();
    tokio::task::spawn_blocking(move || filesys_utils::atomic_write(&target, &bytes))
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool: "write".to_string(),
            message: e.to_string(),
        })?
        .map_err(|e| ToolError::from_io(path, e))
}

fn with_notes(mut payload: Value, notes: Vec<String>) -> Value {
    if !notes.is_empty()
        && let Some(obj) = payload.as_object_mut()
    {
        obj.insert("validation_notes".into(), json!(notes));
    }
    payload
}

fn require_directory(path: &ResolvedPath) -> Result<(), ToolError> {
    match std::fs::metadata(path.as_path()) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(ToolError::NotADirectory {
            path: path.display_relative(),
        }),
        Err(e) => Err(ToolError::from_io(path, e)),
    }
}

/// Shared content-shaping parameters of the mutating tools.
#[derive(Debug, Deserialize)]
struct PayloadArgs {
    #[serde(default)]
    mode: ContentMode,
    input_format: Option<String>,
    file_encoding: Option<String>,
    #[serde(default = "default_true")]
    validate: bool,
}

impl PayloadArgs {
    fn format(&self) -> Result<TransportFormat, ToolError> {
        codec::check_encoding(self.file_encoding.as_deref())?;
        codec::parse_format(self.input_format.as_deref())
    }
}

const PAYLOAD_PROPS: &[(&str, &str)] = &[
    ("mode", "text or binary (default text)"),
    ("input_format", "raw_utf8, base64 or quoted_printable (default raw_utf8)"),
    ("file_encoding", "Only utf-8 is supported"),
];

fn schema_with_payload(mut schema: Value) -> Value {
    if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        for (name, description) in PAYLOAD_PROPS {
            props.insert((*name).into(), json!({ "type": "string", "description": description }));
        }
        props.insert(
            "validate".into(),
            json!({ "type": "boolean", "default": true, "description": "Run the validation hook before persisting" }),
        );
    }
    schema
}

// ============================================================================
// read
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
    #[serde(default)]
    start_offset_inclusive: i64,
    #[serde(default = "default_end")]
    end_offset_inclusive: i64,
    offset_type: Option<String>,
    start_line: Option<i64>,
    end_line: Option<i64>,
    output_format: Option<String>,
    file_encoding: Option<String>,
    add_line_numbers: Option<bool>,
}

#[derive(Debug, Default)]
pub struct ReadTool;

impl ToolExecutor for ReadTool {
    fn name(&self) -> &'static str {
        "read"
    }

    fn description(&self) -> &'static str {
        "Read a file or a range of it. Offsets are 0-based and inclusive; end -1 reads to EOF. \
         Binary files are always read by byte and returned as base64."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": { "type": "string" },
                "start_offset_inclusive": { "type": "integer", "minimum": 0 },
                "end_offset_inclusive": { "type": "integer", "minimum": -1 },
                "offset_type": { "type": "string", "enum": ["line", "char", "byte"] },
                "start_line": { "type": "integer", "minimum": 1, "description": "Legacy 1-based start line" },
                "end_line": { "type": "integer", "minimum": 1, "description": "Legacy 1-based end line" },
                "output_format": { "type": "string" },
                "file_encoding": { "type": "string" },
                "add_line_numbers": { "type": "boolean" }
            }
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: ReadArgs = parse_args(args)?;
        Ok(format!("read {}", typed.path))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ReadArgs = parse_args(&args)?;
            codec::check_encoding(typed.file_encoding.as_deref())?;
            let format = codec::parse_format(typed.output_format.as_deref())?;
            let spec = if typed.start_line.is_some() || typed.end_line.is_some() {
                OffsetSpec::from_line_numbers(typed.start_line, typed.end_line)
            } else {
                OffsetSpec::from_wire(
                    parse_unit(typed.offset_type.as_deref())?,
                    typed.start_offset_inclusive,
                    typed.end_offset_inclusive,
                )
            }
            .map_err(offset_error)?;

            let path = ctx.sandbox.resolve(&typed.path)?;
            let request = ReadRequest {
                spec,
                format,
                line_numbers: typed.add_line_numbers,
            };
            let out = offsets::read_range(&path, request, &ctx.extensions.snapshot(), ctx.limits.max_file_size_bytes)
                .await?;

            Ok(json!({
                "path": path.display_relative(),
                "content": out.content,
                "encoding": if out.binary { "binary" } else { "utf-8" },
                "format": out.format.as_str(),
                "offset_type": out.unit.as_str(),
                "line_numbers": out.line_numbers,
            }))
        })
    }
}

// ============================================================================
// write
// ============================================================================

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    #[serde(flatten)]
    payload: PayloadArgs,
}

#[derive(Debug, Default)]
pub struct WriteTool;

impl ToolExecutor for WriteTool {
    fn name(&self) -> &'static str {
        "write"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a file, creating parent directories as needed. \
         Source files pass through the validation hook first."
    }

    fn schema(&self) -> Value {
        schema_with_payload(json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            }
        }))
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: WriteArgs = parse_args(args)?;
        Ok(format!("write {} ({} chars)", typed.path, typed.content.len()))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WriteArgs = parse_args(&args)?;
            let format = typed.payload.format()?;
            let path = ctx.sandbox.resolve_for_mutation(&typed.path)?;
            if path.as_path().is_dir() {
                return Err(ToolError::NotAFile {
                    path: path.display_relative(),
                });
            }
            let bytes = decode_payload(&typed.content, format, typed.payload.mode)?;
            let (bytes, notes) = gate_payload(ctx, &path, bytes, typed.payload.validate).await?;

            if let Some(parent) = path.as_path().parent()
                && !parent.exists()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::from_io(&path, e))?;
                ctx.sandbox.validate_created_parent(&path)?;
            }

            let written = bytes.len();
            persist(&path, bytes).await?;
            tracing::debug!(path = %path, bytes = written, "Wrote file");

            Ok(with_notes(
                json!({
                    "path": path.display_relative(),
                    "bytes_written": written,
                    "message": format!("Successfully wrote {written} bytes to {path}"),
                }),
                notes,
            ))
        })
    }
}

// ============================================================================
// modify
// ============================================================================

#[derive(Debug, Deserialize)]
struct ModifyArgs {
    path: String,
    start_offset_inclusive: i64,
    end_offset_inclusive: i64,
    new_content: String,
    offset_type: Option<String>,
    #[serde(flatten)]
    payload: PayloadArgs,
}

#[derive(Debug, Default)]
pub struct ModifyTool;

impl ToolExecutor for ModifyTool {
    fn name(&self) -> &'static str {
        "modify"
    }

    fn description(&self) -> &'static str {
        "Replace an inclusive 0-based range of lines, characters or bytes in an existing file. \
         start = line count with end -1 appends."
    }

    fn schema(&self) -> Value {
        schema_with_payload(json!({
            "type": "object",
            "required": ["path", "start_offset_inclusive", "end_offset_inclusive", "new_content"],
            "properties": {
                "path": { "type": "string" },
                "start_offset_inclusive": { "type": "integer", "minimum": 0 },
                "end_offset_inclusive": { "type": "integer", "minimum": -1 },
                "new_content": { "type": "string" },
                "offset_type": { "type": "string", "enum": ["line", "char", "byte"] }
            }
        }))
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: ModifyArgs = parse_args(args)?;
        Ok(format!(
            "modify {} [{}..={}]",
            typed.path, typed.start_offset_inclusive, typed.end_offset_inclusive
        ))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ModifyArgs = parse_args(&args)?;
            let format = typed.payload.format()?;
            let spec = OffsetSpec::from_wire(
                parse_unit(typed.offset_type.as_deref())?,
                typed.start_offset_inclusive,
                typed.end_offset_inclusive,
            )
            .map_err(offset_error)?;

            let path = ctx.sandbox.resolve_for_mutation(&typed.path)?;
            check_regular_file(&path, ctx.limits.max_file_size_bytes).await?;
            let original = tokio::fs::read(path.as_path())
                .await
                .map_err(|e| ToolError::from_io(&path, e))?;

            let as_bytes = typed.payload.mode == ContentMode::Binary || looks_binary(&original);
            let mode = if as_bytes { ContentMode::Binary } else { ContentMode::Text };
            let replacement = decode_payload(&typed.new_content, format, mode)?;
            let updated = edit::splice(&original, spec, &replacement, as_bytes)?;

            let (updated, notes) = gate_payload(ctx, &path, updated, typed.payload.validate).await?;
            persist(&path, updated).await?;

            Ok(with_notes(
                json!({
                    "path": path.display_relative(),
                    "offset_type": if as_bytes { "byte" } else { spec.unit.as_str() },
                    "message": format!("Successfully modified {path}"),
                }),
                notes,
            ))
        })
    }
}

// ============================================================================
// replace
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReplaceArgs {
    path: String,
    old_content: String,
    new_content: String,
    #[serde(default = "default_end")]
    number_of_occurrences: i64,
    #[serde(default)]
    is_regex: bool,
    #[serde(flatten)]
    payload: PayloadArgs,
}

#[derive(Debug, Default)]
pub struct ReplaceTool;

impl ToolExecutor for ReplaceTool {
    fn name(&self) -> &'static str {
        "replace"
    }

    fn description(&self) -> &'static str {
        "Replace the first N occurrences (-1 for all) of a literal string or regex in a file. \
         Regex replacements use $1-style group references and are text-only."
    }

    fn schema(&self) -> Value {
        schema_with_payload(json!({
            "type": "object",
            "required": ["path", "old_content", "new_content"],
            "properties": {
                "path": { "type": "string" },
                "old_content": { "type": "string" },
                "new_content": { "type": "string" },
                "number_of_occurrences": { "type": "integer", "default": -1 },
                "is_regex": { "type": "boolean", "default": false }
            }
        }))
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: ReplaceArgs = parse_args(args)?;
        let kind = if typed.is_regex { "regex" } else { "literal" };
        Ok(format!("replace {kind} in {}", typed.path))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ReplaceArgs = parse_args(&args)?;
            let format = typed.payload.format()?;
            let limit = OccurrenceLimit::from_wire(typed.number_of_occurrences)?;

            let path = ctx.sandbox.resolve_for_mutation(&typed.path)?;
            check_regular_file(&path, ctx.limits.max_file_size_bytes).await?;
            let original = tokio::fs::read(path.as_path())
                .await
                .map_err(|e| ToolError::from_io(&path, e))?;

            let binary = typed.payload.mode == ContentMode::Binary || looks_binary(&original);
            if typed.is_regex && binary {
                return Err(ToolError::UnsupportedOperation {
                    message: "Regex replacement not supported for binary mode".to_string(),
                });
            }
            let mode = if binary { ContentMode::Binary } else { ContentMode::Text };
            let old = decode_payload(&typed.old_content, format, mode)?;
            let new = decode_payload(&typed.new_content, format, mode)?;

            let (updated, replacements) = if typed.is_regex {
                // Text mode guarantees all three are UTF-8 at this point.
                let as_text = |b: &[u8]| String::from_utf8_lossy(b).into_owned();
                let out = edit::replace_regex(&as_text(&original), &as_text(&old), &as_text(&new), limit)?;
                (out.content.into_bytes(), out.replacements)
            } else {
                let out = edit::replace_exact(&original, &old, &new, limit)?;
                (out.content, out.replacements)
            };

            if replacements == 0 {
                return Ok(json!({
                    "path": path.display_relative(),
                    "replacements": 0,
                    "message": "No occurrences found",
                }));
            }

            let (updated, notes) = gate_payload(ctx, &path, updated, typed.payload.validate).await?;
            persist(&path, updated).await?;

            Ok(with_notes(
                json!({
                    "path": path.display_relative(),
                    "replacements": replacements,
                    "message": format!("Replaced {replacements} occurrence(s) in {path}"),
                }),
                notes,
            ))
        })
    }
}

// ============================================================================
// delete / create
// ============================================================================

#[derive(Debug, Deserialize)]
struct PathsArgs {
    paths: Vec<String>,
}

fn paths_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "required": ["paths"],
        "properties": {
            "paths": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "description": description
            }
        }
    })
}

fn item_error(path: &str, err: &ToolError) -> Value {
    json!({ "path": path, "error": err.to_string(), "kind": err.kind() })
}

async fn delete_one(ctx: &ToolCtx, raw: &str) -> Result<String, ToolError> {
    let path = ctx.sandbox.resolve_for_mutation(raw)?;
    if path.is_root() {
        return Err(ToolError::PermissionDenied {
            path: "root directory".to_string(),
        });
    }
    let meta = tokio::fs::symlink_metadata(path.as_path())
        .await
        .map_err(|e| ToolError::from_io(&path, e))?;
    let removed = if meta.is_dir() {
        tokio::fs::remove_dir_all(path.as_path()).await
    } else {
        tokio::fs::remove_file(path.as_path()).await
    };
    removed.map_err(|e| ToolError::from_io(&path, e))?;
    Ok(path.display_relative())
}

async fn create_one(ctx: &ToolCtx, raw: &str) -> Result<String, ToolError> {
    let path = ctx.sandbox.resolve_for_mutation(raw)?;
    match tokio::fs::metadata(path.as_path()).await {
        Ok(meta) if meta.is_dir() => return Ok(path.display_relative()),
        Ok(_) => {
            return Err(ToolError::NotADirectory {
                path: path.display_relative(),
            });
        }
        Err(_) => {}
    }
    tokio::fs::create_dir_all(path.as_path())
        .await
        .map_err(|e| ToolError::from_io(&path, e))?;
    ctx.sandbox.validate_created_parent(&path)?;
    Ok(path.display_relative())
}

#[derive(Debug, Default)]
pub struct DeleteTool;

impl ToolExecutor for DeleteTool {
    fn name(&self) -> &'static str {
        "delete"
    }

    fn description(&self) -> &'static str {
        "Delete files or directories (recursively). Each path is handled independently."
    }

    fn schema(&self) -> Value {
        paths_schema("Paths to delete, relative to the root")
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: PathsArgs = parse_args(args)?;
        Ok(format!("delete {}", typed.paths.join(", ")))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathsArgs = parse_args(&args)?;
            let mut deleted = Vec::new();
            let mut errors = Vec::new();
            for raw in &typed.paths {
                match delete_one(ctx, raw).await {
                    Ok(path) => deleted.push(path),
                    Err(e) => errors.push(item_error(raw, &e)),
                }
            }
            Ok(json!({
                "total_deleted": deleted.len(),
                "total_errors": errors.len(),
                "deleted": deleted,
                "errors": errors,
            }))
        })
    }
}

#[derive(Debug, Default)]
pub struct CreateTool;

impl ToolExecutor for CreateTool {
    fn name(&self) -> &'static str {
        "create"
    }

    fn description(&self) -> &'static str {
        "Create directories, including missing parents. Existing directories count as created."
    }

    fn schema(&self) -> Value {
        paths_schema("Directories to create, relative to the root")
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: PathsArgs = parse_args(args)?;
        Ok(format!("create {}", typed.paths.join(", ")))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathsArgs = parse_args(&args)?;
            let mut created = Vec::new();
            let mut errors = Vec::new();
            for raw in &typed.paths {
                match create_one(ctx, raw).await {
                    Ok(path) => created.push(path),
                    Err(e) => errors.push(item_error(raw, &e)),
                }
            }
            Ok(json!({
                "total_created": created.len(),
                "total_errors": errors.len(),
                "created": created,
                "errors": errors,
            }))
        })
    }
}

// ============================================================================
// list
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default = "default_dot")]
    path: String,
    #[serde(default)]
    recursive: bool,
    pattern: Option<String>,
    limit: Option<usize>,
}

fn default_dot() -> String {
    ".".to_string()
}

#[derive(Debug, Default)]
pub struct ListTool;

impl ToolExecutor for ListTool {
    fn name(&self) -> &'static str {
        "list"
    }

    fn description(&self) -> &'static str {
        "List directory entries with type and size. `pattern` is a glob matched against the \
         entry name or its path below the listed directory."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "default": "." },
                "recursive": { "type": "boolean", "default": false },
                "pattern": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1 }
            }
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: ListArgs = parse_args(args)?;
        Ok(format!("list {}", typed.path))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ListArgs = parse_args(&args)?;
            let base = ctx.sandbox.resolve(&typed.path)?;
            require_directory(&base)?;
            let pattern = build_glob_set(&typed.pattern.into_iter().collect::<Vec<_>>())?;
            let limit = typed.limit.unwrap_or(ctx.limits.default_list_limit).max(1);

            let sandbox = Arc::clone(&ctx.sandbox);
            let recursive = typed.recursive;
            let listing = tokio::task::spawn_blocking(move || {
                let mut walker = WalkBuilder::new(base.as_path());
                walker
                    .standard_filters(false)
                    .follow_links(false)
                    .sort_by_file_name(|a, b| a.cmp(b))
                    .max_depth(if recursive { None } else { Some(1) });

                let mut items = Vec::new();
                let mut limit_reached = false;
                for entry in walker.build().filter_map(Result::ok) {
                    if entry.depth() == 0 {
                        continue;
                    }
                    let path = entry.path();
                    if let Some(set) = &pattern {
                        let below = path.strip_prefix(base.as_path()).unwrap_or(path);
                        if !set.is_match(entry.file_name()) && !set.is_match(below) {
                            continue;
                        }
                    }
                    if items.len() == limit {
                        limit_reached = true;
                        break;
                    }
                    items.push(list_item(&sandbox.display_within(path), &entry));
                }
                (items, limit_reached)
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool: "list".to_string(),
                message: e.to_string(),
            })?;

            let (items, limit_reached) = listing;
            Ok(json!({
                "total_found": items.len(),
                "limit_reached": limit_reached,
                "items": items,
            }))
        })
    }
}

fn list_item(display: &str, entry: &ignore::DirEntry) -> Value {
    let file_type = entry.file_type();
    let kind = match file_type {
        Some(t) if t.is_dir() => "directory",
        Some(t) if t.is_symlink() => "symlink",
        _ => "file",
    };
    let size = (kind == "file")
        .then(|| entry.metadata().ok().map(|m| m.len()))
        .flatten();
    json!({ "path": display, "type": kind, "size": size })
}

// ============================================================================
// find
// ============================================================================

#[derive(Debug, Deserialize)]
struct FindArgs {
    #[serde(default = "default_dot")]
    path: String,
    #[serde(default)]
    keywords_path_name: Vec<String>,
    #[serde(default)]
    keywords_file_content: Vec<String>,
    #[serde(default)]
    regex_keywords: bool,
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FindTool;

impl ToolExecutor for FindTool {
    fn name(&self) -> &'static str {
        "find"
    }

    fn description(&self) -> &'static str {
        "Find files whose path and/or content contain any of the given keywords \
         (case-sensitive; regexes when regex_keywords is true). When both keyword lists \
         are given, both must match."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "default": "." },
                "keywords_path_name": { "type": "array", "items": { "type": "string" } },
                "keywords_file_content": { "type": "array", "items": { "type": "string" } },
                "regex_keywords": { "type": "boolean", "default": false },
                "patterns": { "type": "array", "items": { "type": "string" }, "description": "Globs restricting candidate files" }
            }
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: FindArgs = parse_args(args)?;
        Ok(format!("find in {}", typed.path))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: FindArgs = parse_args(&args)?;
            let base = ctx.sandbox.resolve(&typed.path)?;
            require_directory(&base)?;

            let query = SearchQuery {
                directory: base.as_path().to_path_buf(),
                path_keywords: typed.keywords_path_name,
                content_keywords: typed.keywords_file_content,
                regex_mode: typed.regex_keywords,
                max_results: usize::MAX,
                patterns: build_glob_set(&typed.patterns)?,
            };
            let search = Arc::clone(&ctx.search);
            let found = tokio::task::spawn_blocking(move || search.search(&query))
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool: "find".to_string(),
                    message: e.to_string(),
                })??;

            let matches: Vec<String> = found
                .iter()
                .filter(|p| p.starts_with(ctx.sandbox.root()))
                .map(|p| ctx.sandbox.display_within(p))
                .collect();
            Ok(json!({
                "total_found": matches.len(),
                "matches": matches,
            }))
        })
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Register every tool this crate ships.
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    registry.register(Box::new(ReadTool))?;
    registry.register(Box::new(WriteTool))?;
    registry.register(Box::new(ModifyTool))?;
    registry.register(Box::new(ReplaceTool))?;
    registry.register(Box::new(DeleteTool))?;
    registry.register(Box::new(CreateTool))?;
    registry.register(Box::new(ListTool))?;
    registry.register(Box::new(FindTool))?;
    extract::register_extract_tool(registry)?;
    git::register_git_tool(registry)?;
    python::register_python_tool(registry)?;
    Ok(())
}
