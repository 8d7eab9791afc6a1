use serde::{Deserialize, Serialize};

use crate::messages::{StopReason, ToolCallPart, ToolResultPart};

/// Incremental units of provider output. Ordering contract per step:
///
/// (TextDelta | ToolCall | ToolResult)* → Finish
///
/// Providers assemble complete `ToolCall` chunks internally (argument
/// fragments never cross this boundary). Transport failures mid-stream
/// surface as `Err` items on the chunk stream, not as a chunk kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamChunk {
    #[serde(rename = "text_delta")]
    TextDelta { delta: String },

    #[serde(rename = "tool_call")]
    ToolCall(ToolCallPart),

    /// A result computed provider-side. Most tools run locally, so this is
    /// rare, but remote-executed capabilities report through it.
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultPart),

    #[serde(rename = "finish")]
    Finish { stop_reason: StopReason },
}

impl StreamChunk {
    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    pub fn chunk_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCall(_) => "tool_call",
            Self::ToolResult(_) => "tool_result",
            Self::Finish { .. } => "finish",
        }
    }
}
