use serde::{Deserialize, Serialize};

use crate::ids::{ProjectId, SessionId};
use crate::messages::{AssistantMessage, Message};

/// Session lifecycle and streaming events. The closed set every observer
/// compiles against; adding a variant forces every match site to handle it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "session_created")]
    SessionCreated {
        session_id: SessionId,
        project_id: ProjectId,
    },

    #[serde(rename = "session_deleted")]
    SessionDeleted {
        session_id: SessionId,
        project_id: ProjectId,
    },

    /// Structural change outside the append path: history replaced or
    /// cleared in place.
    #[serde(rename = "session_updated")]
    SessionUpdated { session_id: SessionId },

    #[serde(rename = "message_added")]
    MessageAdded {
        session_id: SessionId,
        message: Message,
    },

    /// Snapshot of the in-progress assistant message after each chunk.
    #[serde(rename = "streaming_update")]
    StreamingUpdate {
        session_id: SessionId,
        message: AssistantMessage,
    },

    #[serde(rename = "loading_changed")]
    LoadingChanged {
        session_id: SessionId,
        is_loading: bool,
    },

    #[serde(rename = "file_changed")]
    FileChanged {
        session_id: SessionId,
        path: String,
    },
}

/// Discriminant for subscription routing. Mirrors [`SessionEvent`] one-to-one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated,
    SessionDeleted,
    SessionUpdated,
    MessageAdded,
    StreamingUpdate,
    LoadingChanged,
    FileChanged,
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionCreated { session_id, .. }
            | Self::SessionDeleted { session_id, .. }
            | Self::SessionUpdated { session_id }
            | Self::MessageAdded { session_id, .. }
            | Self::StreamingUpdate { session_id, .. }
            | Self::LoadingChanged { session_id, .. }
            | Self::FileChanged { session_id, .. } => session_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::SessionCreated { .. } => EventKind::SessionCreated,
            Self::SessionDeleted { .. } => EventKind::SessionDeleted,
            Self::SessionUpdated { .. } => EventKind::SessionUpdated,
            Self::MessageAdded { .. } => EventKind::MessageAdded,
            Self::StreamingUpdate { .. } => EventKind::StreamingUpdate,
            Self::LoadingChanged { .. } => EventKind::LoadingChanged,
            Self::FileChanged { .. } => EventKind::FileChanged,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::SessionDeleted { .. } => "session_deleted",
            Self::SessionUpdated { .. } => "session_updated",
            Self::MessageAdded { .. } => "message_added",
            Self::StreamingUpdate { .. } => "streaming_update",
            Self::LoadingChanged { .. } => "loading_changed",
            Self::FileChanged { .. } => "file_changed",
        }
    }
}
