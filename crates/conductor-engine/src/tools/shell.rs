use std::time::{Duration, Instant};

use async_trait::async_trait;
use conductor_core::tools::{Tool, ToolContext, ToolError, ToolOutput};
use serde::Deserialize;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Shell syntax that smuggles a second command inside the first. Rejected
/// up front rather than sanitized.
const SUBSTITUTION_MARKERS: &[&str] = &["$(", "${", "`"];

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
    /// Per-call override in milliseconds, clamped to [`MAX_TIMEOUT_MS`].
    timeout: Option<u64>,
    /// Accepted so models can annotate calls; not used by the tool.
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

pub struct ShellTool {
    timeout: Duration,
}

impl ShellTool {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

fn vet(command: &str) -> Result<(), ToolError> {
    for marker in SUBSTITUTION_MARKERS {
        if let Some(pos) = command.find(marker) {
            return Err(ToolError::InvalidArguments(format!(
                "command substitution is not allowed ({marker:?} at byte {pos})"
            )));
        }
    }
    Ok(())
}

/// Folds captured output into one transcript string. Returns the text and
/// whether the run counts as an error.
fn render(stdout: &[u8], stderr: &[u8], exit_code: Option<i32>, success: bool) -> (String, bool) {
    let mut sections = Vec::new();

    let out = String::from_utf8_lossy(stdout);
    if !out.is_empty() {
        sections.push(out.into_owned());
    }
    let err = String::from_utf8_lossy(stderr);
    if !err.is_empty() {
        sections.push(format!("STDERR:\n{err}"));
    }

    let mut text = if sections.is_empty() {
        "(no output)".to_string()
    } else {
        sections.join("\n")
    };

    if !success {
        text = format!("Exit code: {}\n{text}", exit_code.unwrap_or(-1));
    }
    (text, !success)
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project working directory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in milliseconds (max 600000)"
                },
                "description": {
                    "type": "string",
                    "description": "Description of what this command does"
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
        let args: ShellArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(format!("bad shell arguments: {e}")))?;
        vet(&args.command)?;

        let deadline = args
            .timeout
            .map(|ms| Duration::from_millis(ms.min(MAX_TIMEOUT_MS)))
            .unwrap_or(self.timeout);

        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(&ctx.working_directory);

        // Dropping the output future on cancel kills the child process.
        let captured = tokio::select! {
            _ = ctx.abort_signal.cancelled() => return Err(ToolError::Cancelled),
            ran = tokio::time::timeout(deadline, cmd.output()) => ran
                .map_err(|_| ToolError::Timeout(deadline))?
                .map_err(|e| ToolError::ExecutionFailed(format!("failed to spawn bash: {e}")))?,
        };

        let (content, is_error) = render(
            &captured.stdout,
            &captured.stderr,
            captured.status.code(),
            captured.status.success(),
        );

        Ok(ToolOutput {
            content,
            is_error,
            duration: start.elapsed(),
        })
    }
}
