pub mod bus;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod session;
pub mod stream;
pub mod tools;

pub use bus::{EventBus, SubscriptionId};
pub use errors::{ConfigError, ProviderError, RegistryError};
pub use events::{EventKind, SessionEvent};
pub use ids::{ClientId, ProjectId, SessionId, ToolCallId};
pub use messages::{
    AssistantMessage, AssistantPart, Message, StopReason, ToolCallPart, ToolResultPart,
    UserMessage, UserPart,
};
pub use provider::{ChatProvider, ChatRequest, ChunkStream, StreamOptions};
pub use session::{SessionConfig, SessionSnapshot, DEFAULT_MAX_STEPS};
pub use stream::StreamChunk;
pub use tools::{Tool, ToolContext, ToolDefinition, ToolError, ToolOutput};
