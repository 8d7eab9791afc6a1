use std::fmt::Write as _;
use std::time::Instant;

use async_trait::async_trait;
use conductor_core::tools::{Tool, ToolContext, ToolError, ToolOutput};
use serde::Deserialize;

use super::resolve_path;
use crate::truncate::floor_char_boundary;

/// Single lines longer than this are cut before reaching the model.
const MAX_LINE_LEN: usize = 2000;
const DEFAULT_LINE_LIMIT: u64 = 2000;

#[derive(Deserialize)]
struct ReadArgs {
    file_path: String,
    /// 1-based first line to show.
    offset: Option<u64>,
    limit: Option<u64>,
}

/// Renders a numbered window of `content`. Empty windows (empty file, or
/// offset past the end) collapse to a placeholder.
fn numbered_window(content: &str, offset: usize, limit: usize) -> String {
    let skip = offset.saturating_sub(1);
    let mut out = String::new();
    for (idx, line) in content.lines().enumerate().skip(skip).take(limit) {
        let shown = if line.len() > MAX_LINE_LEN {
            &line[..floor_char_boundary(line, MAX_LINE_LEN)]
        } else {
            line
        };
        let _ = writeln!(out, "{:>6}\t{shown}", idx + 1);
    }
    if out.is_empty() {
        out.push_str("(empty file)");
    }
    out
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents from the project, numbered by line"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["file_path"],
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the project root"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read"
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
        let args: ReadArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(format!("bad read arguments: {e}")))?;

        let path = resolve_path(&args.file_path, &ctx.working_directory);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to read {}: {e}", path.display()))
        })?;

        let offset = args.offset.unwrap_or(1).max(1) as usize;
        let limit = args.limit.unwrap_or(DEFAULT_LINE_LIMIT) as usize;

        Ok(ToolOutput {
            duration: start.elapsed(),
            ..ToolOutput::text(numbered_window(&content, offset, limit))
        })
    }
}
