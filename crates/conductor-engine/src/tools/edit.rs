use std::time::Instant;

use async_trait::async_trait;
use conductor_core::events::SessionEvent;
use conductor_core::tools::{Tool, ToolContext, ToolError, ToolOutput};
use serde::Deserialize;

use super::resolve_path;

#[derive(Deserialize)]
struct EditArgs {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

/// Applies the replacement in memory. Single-occurrence mode refuses an
/// ambiguous match instead of guessing which one was meant.
fn apply_replacement(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<(String, usize), ToolError> {
    let count = content.matches(old).count();
    match count {
        0 => Err(ToolError::ExecutionFailed(
            "old_string not found in file".into(),
        )),
        1 => Ok((content.replacen(old, new, 1), 1)),
        n if replace_all => Ok((content.replace(old, new), n)),
        n => Err(ToolError::ExecutionFailed(format!(
            "old_string appears {n} times; pass replace_all or add surrounding context"
        ))),
    }
}

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Perform exact string replacement in a file"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["file_path", "old_string", "new_string"],
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the project root"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact string to find and replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The replacement string"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let args: EditArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(format!("bad edit arguments: {e}")))?;

        if args.old_string == args.new_string {
            return Err(ToolError::InvalidArguments(
                "old_string and new_string must be different".into(),
            ));
        }

        let path = resolve_path(&args.file_path, &ctx.working_directory);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to read {}: {e}", path.display()))
        })?;

        let (updated, replaced) = apply_replacement(
            &content,
            &args.old_string,
            &args.new_string,
            args.replace_all,
        )?;

        tokio::fs::write(&path, &updated).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to write {}: {e}", path.display()))
        })?;

        ctx.events.emit(SessionEvent::FileChanged {
            session_id: ctx.session_id.clone(),
            path: path.display().to_string(),
        });

        Ok(ToolOutput {
            duration: start.elapsed(),
            ..ToolOutput::text(format!(
                "Replaced {replaced} occurrence(s) in {}",
                path.display()
            ))
        })
    }
}
