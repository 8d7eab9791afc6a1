use serde_json::{json, Value};

use conductor_core::messages::{AssistantMessage, AssistantPart, Message, ToolCallPart, UserMessage};
use conductor_core::provider::{ChatRequest, StreamOptions};

/// Convert a full ChatRequest into the chat completions request body.
pub fn build_request_body(request: &ChatRequest, options: &StreamOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "stream": true,
    });

    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }

    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    body["messages"] = json!(convert_messages(
        &request.messages,
        request.system_prompt.as_deref()
    ));

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

/// Convert conversation messages to the chat completions format. The system
/// prompt leads; each assistant turn is followed by one `tool` message per
/// resolved tool result so the server sees call and result adjacent.
fn convert_messages(messages: &[Message], system_prompt: Option<&str>) -> Vec<Value> {
    let mut result = Vec::new();

    if let Some(prompt) = system_prompt {
        if !prompt.is_empty() {
            result.push(json!({"role": "system", "content": prompt}));
        }
    }

    for msg in messages {
        match msg {
            Message::User(user) => result.push(convert_user_message(user)),
            Message::Assistant(asst) => convert_assistant_message(asst, &mut result),
        }
    }

    result
}

fn convert_user_message(msg: &UserMessage) -> Value {
    json!({"role": "user", "content": msg.text_content()})
}

fn convert_assistant_message(msg: &AssistantMessage, out: &mut Vec<Value>) {
    let text = msg.text_content();
    let tool_calls: Vec<Value> = msg.tool_calls().iter().map(|tc| convert_tool_call(tc)).collect();

    let mut entry = json!({"role": "assistant"});
    if text.is_empty() && !tool_calls.is_empty() {
        entry["content"] = Value::Null;
    } else {
        entry["content"] = json!(text);
    }
    if !tool_calls.is_empty() {
        entry["tool_calls"] = json!(tool_calls);
    }
    out.push(entry);

    for part in &msg.content {
        if let AssistantPart::ToolResult(tr) = part {
            out.push(json!({
                "role": "tool",
                "tool_call_id": tr.tool_call_id.as_str(),
                "content": tr.output,
            }));
        }
    }
}

fn convert_tool_call(tc: &ToolCallPart) -> Value {
    // Arguments travel as a JSON string on this wire, not an object.
    let arguments =
        serde_json::to_string(&tc.arguments).unwrap_or_else(|_| "{}".to_string());
    json!({
        "id": tc.id.as_str(),
        "type": "function",
        "function": {
            "name": tc.name,
            "arguments": arguments,
        }
    })
}
