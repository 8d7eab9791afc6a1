use std::time::Instant;

use async_trait::async_trait;
use conductor_core::events::SessionEvent;
use conductor_core::tools::{Tool, ToolContext, ToolError, ToolOutput};
use serde_json::{Map, Value};

pub struct AddPackageTool;

#[async_trait]
impl Tool for AddPackageTool {
    fn name(&self) -> &str {
        "add_package"
    }

    fn description(&self) -> &str {
        "Add a dependency to the project's package.json"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Package name (e.g. 'react', '@types/node')"
                },
                "version": {
                    "type": "string",
                    "description": "Version range (default: 'latest')"
                },
                "dev": {
                    "type": "boolean",
                    "description": "Add to devDependencies instead of dependencies"
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

        let name = args["name"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("name is required".into()))?;
        let version = args["version"].as_str().unwrap_or("latest");
        let dev = args["dev"].as_bool().unwrap_or(false);

        let mut manifest = read_manifest(ctx).await?;
        let section = if dev { "devDependencies" } else { "dependencies" };

        let deps = manifest
            .entry(section)
            .or_insert_with(|| Value::Object(Map::new()));
        let deps = deps.as_object_mut().ok_or_else(|| {
            ToolError::ExecutionFailed(format!("package.json {section} is not an object"))
        })?;
        deps.insert(name.to_string(), Value::String(version.to_string()));

        write_manifest(ctx, &manifest).await?;

        Ok(ToolOutput {
            content: format!("Added {name}@{version} to {section}"),
            is_error: false,
            duration: start.elapsed(),
        })
    }
}

pub struct RemovePackageTool;

#[async_trait]
impl Tool for RemovePackageTool {
    fn name(&self) -> &str {
        "remove_package"
    }

    fn description(&self) -> &str {
        "Remove a dependency from the project's package.json"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Package name to remove"
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

        let name = args["name"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("name is required".into()))?;

        let mut manifest = read_manifest(ctx).await?;

        let mut removed_from = Vec::new();
        for section in ["dependencies", "devDependencies"] {
            if let Some(deps) = manifest.get_mut(section).and_then(Value::as_object_mut) {
                if deps.remove(name).is_some() {
                    removed_from.push(section);
                }
            }
        }

        if removed_from.is_empty() {
            return Err(ToolError::ExecutionFailed(format!(
                "{name} is not listed in dependencies or devDependencies"
            )));
        }

        write_manifest(ctx, &manifest).await?;

        Ok(ToolOutput {
            content: format!("Removed {name} from {}", removed_from.join(" and ")),
            is_error: false,
            duration: start.elapsed(),
        })
    }
}

async fn read_manifest(ctx: &ToolContext) -> Result<Map<String, Value>, ToolError> {
    let path = ctx.working_directory.join("package.json");
    let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
        ToolError::ExecutionFailed(format!("Failed to read {}: {e}", path.display()))
    })?;

    let manifest: Value = serde_json::from_str(&raw)
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to parse package.json: {e}")))?;

    match manifest {
        Value::Object(map) => Ok(map),
        _ => Err(ToolError::ExecutionFailed(
            "package.json is not a JSON object".into(),
        )),
    }
}

async fn write_manifest(ctx: &ToolContext, manifest: &Map<String, Value>) -> Result<(), ToolError> {
    let path = ctx.working_directory.join("package.json");
    let serialized = serde_json::to_string_pretty(manifest)
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to serialize package.json: {e}")))?;

    tokio::fs::write(&path, format!("{serialized}\n"))
        .await
        .map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to write {}: {e}", path.display()))
        })?;

    ctx.events.emit(SessionEvent::FileChanged {
        session_id: ctx.session_id.clone(),
        path: path.display().to_string(),
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::bus::EventBus;
    use conductor_core::events::EventKind;
    use conductor_core::ids::{ProjectId, SessionId};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn test_ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext {
            session_id: SessionId::new(),
            project_id: ProjectId::from("proj-test"),
            working_directory: dir.to_path_buf(),
            abort_signal: CancellationToken::new(),
            events: Arc::new(EventBus::new()),
        }
    }

    fn setup(manifest: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("conductor_pkg_{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("package.json"), manifest).unwrap();
        dir
    }

    #[tokio::test]
    async fn add_creates_dependencies_section() {
        let dir = setup(r#"{"name": "demo"}"#);

        let tool = AddPackageTool;
        let result = tool
            .execute(serde_json::json!({"name": "react"}), &test_ctx(&dir))
            .await
            .unwrap();

        assert!(result.content.contains("react@latest"));
        let manifest = fs::read_to_string(dir.join("package.json")).unwrap();
        let parsed: Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(parsed["dependencies"]["react"], "latest");
        assert_eq!(parsed["name"], "demo");

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn add_with_version() {
        let dir = setup(r#"{"dependencies": {"left-pad": "1.0.0"}}"#);

        let tool = AddPackageTool;
        tool.execute(
            serde_json::json!({"name": "react", "version": "^18.2.0"}),
            &test_ctx(&dir),
        )
        .await
        .unwrap();

        let parsed: Value =
            serde_json::from_str(&fs::read_to_string(dir.join("package.json")).unwrap()).unwrap();
        assert_eq!(parsed["dependencies"]["react"], "^18.2.0");
        assert_eq!(parsed["dependencies"]["left-pad"], "1.0.0");

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn add_dev_dependency() {
        let dir = setup("{}");

        let tool = AddPackageTool;
        let result = tool
            .execute(
                serde_json::json!({"name": "vitest", "dev": true}),
                &test_ctx(&dir),
            )
            .await
            .unwrap();

        assert!(result.content.contains("devDependencies"));
        let parsed: Value =
            serde_json::from_str(&fs::read_to_string(dir.join("package.json")).unwrap()).unwrap();
        assert_eq!(parsed["devDependencies"]["vitest"], "latest");
        assert!(parsed.get("dependencies").is_none());

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn add_without_manifest_fails() {
        let dir = std::env::temp_dir().join(format!("conductor_pkg_{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(&dir).unwrap();

        let tool = AddPackageTool;
        let result = tool
            .execute(serde_json::json!({"name": "react"}), &test_ctx(&dir))
            .await;

        assert!(result.is_err());

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn remove_existing_package() {
        let dir = setup(r#"{"dependencies": {"react": "^18.0.0", "vue": "^3.0.0"}}"#);

        let tool = RemovePackageTool;
        let result = tool
            .execute(serde_json::json!({"name": "react"}), &test_ctx(&dir))
            .await
            .unwrap();

        assert!(result.content.contains("Removed react"));
        let parsed: Value =
            serde_json::from_str(&fs::read_to_string(dir.join("package.json")).unwrap()).unwrap();
        assert!(parsed["dependencies"].get("react").is_none());
        assert_eq!(parsed["dependencies"]["vue"], "^3.0.0");

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn remove_from_both_sections() {
        let dir = setup(
            r#"{"dependencies": {"typescript": "^5.0.0"}, "devDependencies": {"typescript": "^5.0.0"}}"#,
        );

        let tool = RemovePackageTool;
        let result = tool
            .execute(serde_json::json!({"name": "typescript"}), &test_ctx(&dir))
            .await
            .unwrap();

        assert!(result.content.contains("dependencies and devDependencies"));

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn remove_unlisted_package_fails() {
        let dir = setup(r#"{"dependencies": {}}"#);

        let tool = RemovePackageTool;
        let result = tool
            .execute(serde_json::json!({"name": "react"}), &test_ctx(&dir))
            .await;

        assert!(result.is_err());

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn add_emits_file_changed() {
        let dir = setup("{}");

        let ctx = test_ctx(&dir);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        ctx.events.on(EventKind::FileChanged, move |event| {
            if let SessionEvent::FileChanged { path, .. } = event {
                assert!(path.ends_with("package.json"));
            }
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let tool = AddPackageTool;
        tool.execute(serde_json::json!({"name": "react"}), &ctx)
            .await
            .unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);

        fs::remove_dir_all(&dir).ok();
    }
}
