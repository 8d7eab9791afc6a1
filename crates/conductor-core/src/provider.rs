use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::ProviderError;
use crate::messages::Message;
use crate::stream::StreamChunk;
use crate::tools::ToolDefinition;

/// Stream handed back by a provider. Each item is either a chunk or a
/// mid-stream transport failure; the agent loop treats an `Err` item like a
/// failed request for the current step.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// One model round-trip: full conversation so far plus the tools the model
/// may call this step.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

/// Options controlling generation behavior.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    /// Overrides the provider's default model for this request.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Trait implemented by each chat backend (OpenAI-compatible HTTP, mock).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn supports_tools(&self) -> bool;

    async fn stream(
        &self,
        request: &ChatRequest,
        options: &StreamOptions,
    ) -> Result<ChunkStream, ProviderError>;
}
