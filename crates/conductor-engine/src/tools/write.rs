use std::time::Instant;

use async_trait::async_trait;
use conductor_core::events::SessionEvent;
use conductor_core::tools::{Tool, ToolContext, ToolError, ToolOutput};
use serde::Deserialize;

use super::resolve_path;

#[derive(Deserialize)]
struct WriteArgs {
    file_path: String,
    content: String,
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["file_path", "content"],
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
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
        let args: WriteArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(format!("bad write arguments: {e}")))?;

        let path = resolve_path(&args.file_path, &ctx.working_directory);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionFailed(format!("Failed to create directory: {e}"))
            })?;
        }
        tokio::fs::write(&path, &args.content).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to write {}: {e}", path.display()))
        })?;

        ctx.events.emit(SessionEvent::FileChanged {
            session_id: ctx.session_id.clone(),
            path: path.display().to_string(),
        });

        Ok(ToolOutput {
            duration: start.elapsed(),
            ..ToolOutput::text(format!(
                "Wrote {} bytes ({} lines) to {}",
                args.content.len(),
                args.content.lines().count(),
                path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testkit::Scratch;
    use conductor_core::events::EventKind;
    use parking_lot::Mutex;
    use std::fs;
    use std::sync::Arc;

    #[tokio::test]
    async fn creates_the_file_and_reports_size() {
        let scratch = Scratch::new("write");

        let out = WriteFileTool
            .execute(
                serde_json::json!({"file_path": "output.txt", "content": "hello world\n"}),
                &scratch.ctx(),
            )
            .await
            .unwrap();

        assert!(!out.is_error);
        assert!(out.content.contains("12 bytes"));
        assert!(out.content.contains("1 lines"));
        assert_eq!(
            fs::read_to_string(scratch.path().join("output.txt")).unwrap(),
            "hello world\n"
        );
    }

    #[tokio::test]
    async fn missing_parent_directories_are_created() {
        let scratch = Scratch::new("write");

        WriteFileTool
            .execute(
                serde_json::json!({"file_path": "a/b/c/file.txt", "content": "nested"}),
                &scratch.ctx(),
            )
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(scratch.path().join("a/b/c/file.txt")).unwrap(),
            "nested"
        );
    }

    #[tokio::test]
    async fn existing_content_is_replaced() {
        let scratch = Scratch::new("write");
        let file = scratch.file("existing.txt", "old content");

        WriteFileTool
            .execute(
                serde_json::json!({
                    "file_path": file.to_str().unwrap(),
                    "content": "new content"
                }),
                &scratch.ctx(),
            )
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "new content");
    }

    #[tokio::test]
    async fn announces_the_changed_path() {
        let scratch = Scratch::new("write");
        let ctx = scratch.ctx();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ctx.events.on(EventKind::FileChanged, move |event| {
            if let SessionEvent::FileChanged { path, .. } = event {
                sink.lock().push(path.clone());
            }
        });

        WriteFileTool
            .execute(
                serde_json::json!({"file_path": "notes.txt", "content": "hi"}),
                &ctx,
            )
            .await
            .unwrap();

        let paths = seen.lock();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("notes.txt"));
    }
}
