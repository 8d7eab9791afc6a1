use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use conductor_core::tools::{Tool, ToolContext, ToolError, ToolOutput};
use serde::Deserialize;

/// Upper bound on listed paths. One broad pattern should not be able to
/// flood the transcript; overflow is summarized instead.
const MAX_LISTED: usize = 500;

#[derive(Deserialize)]
struct GlobArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["pattern"],
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern (e.g. '**/*.rs', 'src/**/*.ts')"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (defaults to the working directory)"
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
        let args: GlobArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(format!("bad glob arguments: {e}")))?;

        let base = match args.path.as_deref() {
            Some(p) => super::resolve_path(p, &ctx.working_directory),
            None => ctx.working_directory.clone(),
        };
        let full_pattern = base.join(&args.pattern).to_string_lossy().into_owned();

        let mut paths = walk_pattern(full_pattern).await?;
        if paths.is_empty() {
            return Ok(ToolOutput {
                duration: start.elapsed(),
                ..ToolOutput::text("No files matched the pattern.")
            });
        }

        // Sorted so repeated runs over the same tree give identical output.
        paths.sort();
        let total = paths.len();
        let mut lines: Vec<String> = paths
            .iter()
            .take(MAX_LISTED)
            .map(|p| p.display().to_string())
            .collect();
        if total > MAX_LISTED {
            lines.push(format!("... {} more not shown", total - MAX_LISTED));
        }

        Ok(ToolOutput {
            duration: start.elapsed(),
            ..ToolOutput::text(format!("{total} file(s) matched:\n{}", lines.join("\n")))
        })
    }
}

/// Pattern expansion hits the filesystem, so it runs off the async runtime.
async fn walk_pattern(pattern: String) -> Result<Vec<PathBuf>, ToolError> {
    tokio::task::spawn_blocking(move || {
        let entries = glob::glob(&pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid glob pattern: {e}")))?;
        Ok(entries.flatten().collect())
    })
    .await
    .map_err(|e| ToolError::ExecutionFailed(format!("glob worker failed: {e}")))?
}
