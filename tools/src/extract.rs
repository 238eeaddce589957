//! Document extraction seam and the `extract` tool.

use std::path::Path;
use std::sync::Arc;

use filesys_types::{ExtractionOptions, ExtractionResult};
use serde::Deserialize;
use serde_json::{Value, json};

use super::offsets::check_regular_file;
use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args};

/// Turns a document on disk into structured text.
///
/// Implementations are blocking; the tool runs them on the blocking pool.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path, options: &ExtractionOptions) -> Result<ExtractionResult, ToolError>;
}

#[derive(Debug, Deserialize)]
struct ExtractArgs {
    path: String,
    #[serde(default)]
    options: ExtractionOptions,
}

struct ExtractTool;

impl ToolExecutor for ExtractTool {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn description(&self) -> &'static str {
        "Extract text, sections, tables and metadata from a document inside the root directory."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": { "type": "string" },
                "options": {
                    "type": "object",
                    "properties": {
                        "include_tables": { "type": "boolean" },
                        "include_images": { "type": "boolean" },
                        "max_pages": { "type": "integer", "minimum": 1 }
                    }
                }
            }
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: ExtractArgs = parse_args(args)?;
        Ok(format!("extract {}", typed.path))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ExtractArgs = parse_args(&args)?;
            let path = ctx.sandbox.resolve(&typed.path)?;
            check_regular_file(&path, ctx.limits.max_file_size_bytes).await?;

            let extractor = ctx
                .extractor
                .as_ref()
                .map(Arc::clone)
                .ok_or_else(|| ToolError::UnsupportedOperation {
                    message: "document extraction is not available".to_string(),
                })?;

            let absolute = path.as_path().to_path_buf();
            let options = typed.options;
            let result = tokio::task::spawn_blocking(move || extractor.extract(&absolute, &options))
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool: "extract".to_string(),
                    message: e.to_string(),
                })??;

            tracing::debug!(path = %path, sections = result.sections.len(), "Extracted document");
            let mut payload = serde_json::to_value(result).unwrap_or(Value::Null);
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("path".into(), json!(path.display_relative()));
            }
            Ok(payload)
        })
    }
}

pub fn register_extract_tool(registry: &mut super::ToolRegistry) -> Result<(), ToolError> {
    registry.register(Box::new(ExtractTool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSettings;
    use filesys_types::ExtractedSection;

    struct FirstLineExtractor;

    impl Extractor for FirstLineExtractor {
        fn extract(&self, path: &Path, _options: &ExtractionOptions) -> Result<ExtractionResult, ToolError> {
            let text = std::fs::read_to_string(path).map_err(|e| ToolError::from_io(path.display(), e))?;
            Ok(ExtractionResult {
                title: text.lines().next().map(ToString::to_string),
                sections: vec![ExtractedSection {
                    heading: None,
                    level: 1,
                    text: text.clone(),
                }],
                full_text: text,
                ..ExtractionResult::default()
            })
        }
    }

    fn ctx(dir: &Path) -> ToolCtx {
        ToolCtx::from_settings(&ToolSettings::for_root(dir)).unwrap()
    }

    #[tokio::test]
    async fn without_extractor_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.txt"), "Title\nbody\n").unwrap();
        let err = ExtractTool
            .execute(json!({"path": "doc.txt"}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported_operation");
    }

    #[tokio::test]
    async fn injected_extractor_is_used() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.txt"), "Title\nbody\n").unwrap();
        let ctx = ctx(dir.path()).with_extractor(Arc::new(FirstLineExtractor));
        let out = ExtractTool
            .execute(json!({"path": "doc.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["title"], "Title");
        assert_eq!(out["path"], "doc.txt");
    }

    #[tokio::test]
    async fn path_checks_run_before_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path()).with_extractor(Arc::new(FirstLineExtractor));
        let err = ExtractTool
            .execute(json!({"path": "missing.pdf"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        let err = ExtractTool
            .execute(json!({"path": "../x.pdf"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "outside_root");
    }
}
