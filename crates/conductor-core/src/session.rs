use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::ids::{ProjectId, SessionId};
use crate::messages::{AssistantMessage, Message};
use crate::tools::Tool;

/// Step budget applied when a session does not set one.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// Per-session configuration, fixed at creation. `start_new_session` clears
/// the conversation but keeps this intact.
#[derive(Clone)]
pub struct SessionConfig {
    pub project_id: ProjectId,
    pub project_name: String,
    pub working_directory: PathBuf,
    pub system_prompt: Option<String>,
    /// Upper bound on provider round-trips per generation.
    pub max_steps: usize,
    /// Project-local tools. Shadow custom and built-in tools by name.
    pub tools: Vec<Arc<dyn Tool>>,
    /// Caller-injected tools. Shadow built-in tools by name.
    pub custom_tools: Vec<Arc<dyn Tool>>,
}

impl SessionConfig {
    pub fn new(project_id: impl Into<ProjectId>, project_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            project_name: project_name.into(),
            working_directory: PathBuf::from("."),
            system_prompt: None,
            max_steps: DEFAULT_MAX_STEPS,
            tools: Vec::new(),
            custom_tools: Vec::new(),
        }
    }

    /// Fail-fast checks applied before a session is registered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.is_empty() {
            return Err(ConfigError::EmptyProjectId);
        }
        if self.max_steps == 0 {
            return Err(ConfigError::ZeroMaxSteps);
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("project_id", &self.project_id)
            .field("project_name", &self.project_name)
            .field("working_directory", &self.working_directory)
            .field("max_steps", &self.max_steps)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
            )
            .field(
                "custom_tools",
                &self
                    .custom_tools
                    .iter()
                    .map(|t| t.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Read-only view of a session's state at a point in time. Tools appear by
/// name only; the executable objects stay inside the registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub project_name: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_message: Option<AssistantMessage>,
    pub is_loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub max_steps: usize,
    pub tool_names: Vec<String>,
    pub custom_tool_names: Vec<String>,
    pub last_activity: DateTime<Utc>,
}
