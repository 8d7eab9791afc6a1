use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use conductor_core::errors::ProviderError;
use conductor_core::provider::{ChatProvider, ChatRequest, ChunkStream, StreamOptions};
use conductor_core::stream::StreamChunk;

use crate::converter;
use crate::sse::{self, SseParser};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Provider speaking the OpenAI-compatible chat completions protocol. Works
/// against api.openai.com and any gateway that implements the same surface.
pub struct ChatCompletionsProvider {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl ChatCompletionsProvider {
    pub fn new(base_url: &str, api_key: SecretString, model: Option<&str>) -> Self {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_tools(&self) -> bool {
        true
    }

    #[instrument(skip(self, request, options), fields(model = %options.model.as_deref().unwrap_or(&self.model)))]
    async fn stream(
        &self,
        request: &ChatRequest,
        options: &StreamOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let body = converter::build_request_body(request, options, model);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        Ok(Box::pin(SseStream::new(resp.bytes_stream())))
    }
}

/// Decodes an SSE byte stream into chunks. Carries an idle deadline: when
/// nothing arrives for `idle` the stream yields `StreamInterrupted` instead
/// of hanging forever on a wedged connection.
struct SseStream {
    source: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    buffer: String,
    ready: VecDeque<Result<StreamChunk, ProviderError>>,
    deadline: Pin<Box<tokio::time::Sleep>>,
    idle: Duration,
}

impl SseStream {
    fn new(
        source: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self::with_idle_timeout(source, STREAM_IDLE_TIMEOUT)
    }

    fn with_idle_timeout(
        source: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle: Duration,
    ) -> Self {
        Self {
            source: Box::pin(source),
            parser: SseParser::new(),
            buffer: String::new(),
            ready: VecDeque::new(),
            deadline: Box::pin(tokio::time::sleep(idle)),
            idle,
        }
    }

    /// Appends network bytes and decodes every complete frame in the buffer.
    fn ingest(&mut self, bytes: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..pos + 2).collect();
            for data in sse::parse_sse_data(&frame) {
                self.ready.extend(self.parser.parse_data(&data));
            }
        }
    }

    /// Decodes a final unterminated frame once the connection closes.
    fn flush_tail(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let tail = std::mem::take(&mut self.buffer);
        for data in sse::parse_sse_data(&tail) {
            self.ready.extend(self.parser.parse_data(&data));
        }
    }
}

impl Stream for SseStream {
    type Item = Result<StreamChunk, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Poll::Ready(Some(item));
            }

            match self.source.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let fresh = tokio::time::Instant::now() + self.idle;
                    self.deadline.as_mut().reset(fresh);
                    self.ingest(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ProviderError::StreamInterrupted(
                        e.to_string(),
                    ))));
                }
                Poll::Ready(None) => {
                    self.flush_tail();
                    match self.ready.pop_front() {
                        Some(item) => return Poll::Ready(Some(item)),
                        None => return Poll::Ready(None),
                    }
                }
                Poll::Pending => {
                    return match self.deadline.as_mut().poll(cx) {
                        Poll::Ready(()) => Poll::Ready(Some(Err(
                            ProviderError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle.as_secs()
                            )),
                        ))),
                        Poll::Pending => Poll::Pending,
                    };
                }
            }
        }
    }
}
