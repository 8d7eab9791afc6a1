//! Scripted provider for tests and offline runs. Responses play back in
//! call order, and every request is recorded for later inspection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;

use conductor_core::errors::ProviderError;
use conductor_core::ids::ToolCallId;
use conductor_core::messages::{StopReason, ToolCallPart};
use conductor_core::provider::{ChatProvider, ChatRequest, ChunkStream, StreamOptions};
use conductor_core::stream::StreamChunk;

pub enum MockResponse {
    /// Yield a sequence of stream items.
    Stream(Vec<Result<StreamChunk, ProviderError>>),
    /// Fail the stream() call itself.
    Error(ProviderError),
    /// Sleep, then play the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// One text delta and a clean finish.
    pub fn stream_text(text: &str) -> Self {
        Self::stream_chunks(vec![
            StreamChunk::TextDelta {
                delta: text.to_string(),
            },
            StreamChunk::Finish {
                stop_reason: StopReason::EndTurn,
            },
        ])
    }

    pub fn stream_chunks(chunks: Vec<StreamChunk>) -> Self {
        Self::Stream(chunks.into_iter().map(Ok).collect())
    }

    /// One tool call and a tool_use finish.
    pub fn stream_tool_call(id: &str, name: &str, arguments: Value) -> Self {
        Self::stream_chunks(vec![
            StreamChunk::ToolCall(ToolCallPart {
                id: ToolCallId::from_raw(id),
                name: name.to_string(),
                arguments,
            }),
            StreamChunk::Finish {
                stop_reason: StopReason::ToolUse,
            },
        ])
    }

    /// A stream that dies mid-flight after yielding `chunks`.
    pub fn stream_then_error(chunks: Vec<StreamChunk>, error: ProviderError) -> Self {
        let mut items: Vec<Result<StreamChunk, ProviderError>> =
            chunks.into_iter().map(Ok).collect();
        items.push(Err(error));
        Self::Stream(items)
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

pub struct MockProvider {
    script: Vec<MockResponse>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(ChatRequest, StreamOptions)>>,
}

impl MockProvider {
    pub fn new(script: Vec<MockResponse>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().iter().map(|(req, _)| req.clone()).collect()
    }

    /// Options each call carried, in call order.
    pub fn options_seen(&self) -> Vec<StreamOptions> {
        self.seen.lock().iter().map(|(_, opts)| opts.clone()).collect()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        options: &StreamOptions,
    ) -> Result<ChunkStream, ProviderError> {
        self.seen.lock().push((request.clone(), options.clone()));
        let turn = self.calls.fetch_add(1, Ordering::Relaxed);

        match self.script.get(turn) {
            Some(response) => materialize(response).await,
            None => Err(ProviderError::InvalidRequest(format!(
                "mock script exhausted at call {turn}"
            ))),
        }
    }
}

/// Peels nested delays without recursing, then yields the payload.
async fn materialize(response: &MockResponse) -> Result<ChunkStream, ProviderError> {
    let mut next = response;
    loop {
        next = match next {
            MockResponse::Delay(pause, inner) => {
                tokio::time::sleep(*pause).await;
                inner
            }
            MockResponse::Stream(items) => return Ok(Box::pin(stream::iter(items.clone()))),
            MockResponse::Error(e) => return Err(e.clone()),
        };
    }
}
