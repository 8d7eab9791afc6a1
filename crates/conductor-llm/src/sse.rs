use serde::Deserialize;
use serde_json::Value;

use conductor_core::errors::ProviderError;
use conductor_core::ids::ToolCallId;
use conductor_core::messages::{StopReason, ToolCallPart};
use conductor_core::stream::StreamChunk;

/// State machine for decoding an OpenAI-compatible chat completion stream.
///
/// Text deltas pass through as they arrive. Tool calls arrive as argument
/// fragments keyed by index and are held back until the finish frame, so a
/// `ToolCall` chunk always carries complete, parseable arguments.
pub struct SseParser {
    text: String,
    tool_calls: Vec<PartialToolCall>,
    finished: bool,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments_json: String,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            tool_calls: Vec::new(),
            finished: false,
        }
    }

    /// Decode one `data:` payload into zero or more stream items.
    pub fn parse_data(&mut self, data: &str) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut items = Vec::new();
        let data = data.trim();

        if data.is_empty() || self.finished {
            return items;
        }

        if data == "[DONE]" {
            // Well-behaved servers send finish_reason first; synthesize a
            // finish for those that go straight to the sentinel.
            self.finish(None, &mut items);
            return items;
        }

        // Frames that do not deserialize are skipped, same as unknown event
        // types. Keepalive comments never reach this point.
        let Ok(frame) = serde_json::from_str::<RawFrame>(data) else {
            return items;
        };

        if let Some(err) = frame.error {
            items.push(Err(classify_error(&err)));
            self.finished = true;
            return items;
        }

        let Some(choice) = frame.choices.unwrap_or_default().into_iter().next() else {
            return items;
        };

        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    self.text.push_str(&content);
                    items.push(Ok(StreamChunk::TextDelta { delta: content }));
                }
            }

            for tc in delta.tool_calls.unwrap_or_default() {
                let idx = tc.index.unwrap_or(0);
                while self.tool_calls.len() <= idx {
                    self.tool_calls.push(PartialToolCall::default());
                }
                let slot = &mut self.tool_calls[idx];
                if let Some(id) = tc.id {
                    if !id.is_empty() {
                        slot.id = id;
                    }
                }
                if let Some(function) = tc.function {
                    if let Some(name) = function.name {
                        slot.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        slot.arguments_json.push_str(&arguments);
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish(Some(&reason), &mut items);
        }

        items
    }

    /// Cumulative text seen so far. Used for logging on stream teardown.
    pub fn text_so_far(&self) -> &str {
        &self.text
    }

    fn finish(&mut self, reason: Option<&str>, items: &mut Vec<Result<StreamChunk, ProviderError>>) {
        self.finished = true;
        let pending = std::mem::take(&mut self.tool_calls);
        let has_tool_calls = !pending.is_empty();

        for partial in pending {
            items.push(Ok(StreamChunk::ToolCall(partial.into_part())));
        }

        let stop_reason = match reason {
            Some("stop") => StopReason::EndTurn,
            Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            Some("content_filter") => StopReason::ContentFilter,
            _ if has_tool_calls => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        };
        items.push(Ok(StreamChunk::Finish { stop_reason }));
    }
}

impl PartialToolCall {
    fn into_part(self) -> ToolCallPart {
        // Some gateways omit the id; synthesize one so results can correlate.
        let id = if self.id.is_empty() {
            ToolCallId::new()
        } else {
            ToolCallId::from_raw(&self.id)
        };
        let arguments: Value = serde_json::from_str(&self.arguments_json)
            .unwrap_or(Value::Object(serde_json::Map::new()));
        ToolCallPart {
            id,
            name: self.name,
            arguments,
        }
    }
}

fn classify_error(err: &ErrorPayload) -> ProviderError {
    let message = err.message.clone();
    let code = err.code.as_ref().and_then(Value::as_str).unwrap_or("");
    let error_type = err.error_type.as_deref().unwrap_or("");

    if code == "invalid_api_key" || error_type == "authentication_error" {
        return ProviderError::AuthenticationFailed(message);
    }
    if code == "context_length_exceeded"
        || message.contains("context length")
        || message.contains("maximum context")
    {
        return ProviderError::ContextWindowExceeded(message);
    }

    match error_type {
        "rate_limit_error" | "insufficient_quota" => {
            ProviderError::RateLimited { retry_after: None }
        }
        "overloaded_error" => ProviderError::Overloaded,
        "invalid_request_error" => ProviderError::InvalidRequest(message),
        _ => ProviderError::ServerError {
            status: 500,
            body: message,
        },
    }
}

/// Split raw SSE text into `data:` payloads, one per frame. Multi-line data
/// within a frame joins with newlines per the SSE spec; comment and field
/// lines other than `data:` are dropped.
pub fn parse_sse_data(raw: &str) -> Vec<String> {
    let mut frames = Vec::new();
    let mut current = String::new();

    for line in raw.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(data);
        } else if line.is_empty() && !current.is_empty() {
            frames.push(std::mem::take(&mut current));
        }
    }

    // Handle trailing frame without blank line
    if !current.is_empty() {
        frames.push(current);
    }

    frames
}

// --- Deserialization types for the chat completion chunk wire format ---

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    choices: Option<Vec<ChoicePayload>>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Deserialize)]
struct ChoicePayload {
    #[serde(default)]
    delta: Option<DeltaPayload>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}
