//! The capability seam between the generation loop and anything that can
//! act on a project: filesystem access, shell, package manipulation, or a
//! caller-injected capability.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::ids::{ProjectId, SessionId};

/// Everything a tool may need while it runs. Handed in per call; tools
/// themselves stay stateless.
pub struct ToolContext {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    /// Relative paths in tool arguments resolve under this directory.
    pub working_directory: PathBuf,
    /// Cooperative cancellation; long-running tools should select on it.
    pub abort_signal: CancellationToken,
    /// Tools that touch the workspace emit `file_changed` here.
    pub events: Arc<EventBus>,
}

/// What a tool hands back. `is_error` keeps failures in-band so the model
/// can read them; `duration` is wall-clock execution time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            duration: Duration::ZERO,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

/// The schema-bearing description of a tool, serialized into provider
/// requests so the model knows what it may call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// One executable capability. Implementations are registered by name and
/// invoked with already-parsed JSON arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON schema for the arguments object.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// Durations cross the wire as integer milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        ser.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_millis)
    }
}
