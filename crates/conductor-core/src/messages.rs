use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// One entry in a session's conversation history. The serialized form is
/// also the persistence and client-facing shape, so field and tag names
/// here are load-bearing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: Vec<UserPart>,
}

/// An assistant message is an ordered sequence of parts. Part order reflects
/// provider emission order and must be preserved: the UI re-renders from it
/// and the next request is rebuilt from it.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AssistantMessage {
    pub content: Vec<AssistantPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserPart {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AssistantPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallPart),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultPart),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResultPart {
    pub tool_call_id: ToolCallId,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    ContentFilter,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage::text(text))
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(text))
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
        }
    }
}

impl UserMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![UserPart::Text { text: text.into() }],
        }
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|UserPart::Text { text }| text.as_str())
            .collect()
    }
}

impl AssistantMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![AssistantPart::Text { text: text.into() }],
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    /// Append a streamed text delta, extending the last text part if the
    /// message currently ends in one.
    pub fn push_text_delta(&mut self, delta: &str) {
        if let Some(AssistantPart::Text { text }) = self.content.last_mut() {
            text.push_str(delta);
        } else {
            self.content.push(AssistantPart::Text {
                text: delta.to_owned(),
            });
        }
    }

    pub fn push_tool_call(&mut self, call: ToolCallPart) {
        self.content.push(AssistantPart::ToolCall(call));
    }

    pub fn push_tool_result(&mut self, result: ToolResultPart) {
        self.content.push(AssistantPart::ToolResult(result));
    }

    pub fn tool_calls(&self) -> Vec<&ToolCallPart> {
        self.parts_of(|p| match p {
            AssistantPart::ToolCall(tc) => Some(tc),
            _ => None,
        })
    }

    /// Tool calls with no result part carrying the same id. A run resumed
    /// after a crash uses this to know which calls still owe a result.
    pub fn unresolved_tool_calls(&self) -> Vec<&ToolCallPart> {
        let answered: HashSet<&ToolCallId> = self
            .parts_of(|p| match p {
                AssistantPart::ToolResult(tr) => Some(&tr.tool_call_id),
                _ => None,
            })
            .into_iter()
            .collect();

        self.tool_calls()
            .into_iter()
            .filter(|tc| !answered.contains(&tc.id))
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|p| matches!(p, AssistantPart::ToolCall(_)))
    }

    pub fn text_content(&self) -> String {
        self.parts_of(|p| match p {
            AssistantPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .concat()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    fn parts_of<'a, T>(&'a self, select: impl Fn(&'a AssistantPart) -> Option<T>) -> Vec<T> {
        self.content.iter().filter_map(select).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &ToolCallId, name: &str) -> ToolCallPart {
        ToolCallPart {
            id: id.clone(),
            name: name.into(),
            arguments: serde_json::json!({}),
        }
    }

    fn result(id: &ToolCallId, output: &str) -> ToolResultPart {
        ToolResultPart {
            tool_call_id: id.clone(),
            output: output.into(),
            is_error: false,
        }
    }

    #[test]
    fn text_constructors_tag_their_role() {
        for (msg, role, body) in [
            (Message::user_text("hello"), "user", "hello"),
            (Message::assistant_text("world"), "assistant", "world"),
        ] {
            assert_eq!(msg.role(), role);
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["role"], role);
            assert_eq!(json["content"][0]["type"], "text");
            assert_eq!(json["content"][0]["text"], body);
        }
    }

    #[test]
    fn deltas_grow_the_trailing_text_part() {
        let mut msg = AssistantMessage::new();
        msg.push_text_delta("Hi");
        msg.push_text_delta(" there");
        assert_eq!(msg.content.len(), 1);
        assert_eq!(msg.text_content(), "Hi there");
    }

    #[test]
    fn a_tool_call_splits_the_text() {
        let mut msg = AssistantMessage::new();
        msg.push_text_delta("Let me check.");
        msg.push_tool_call(call(&ToolCallId::new(), "read_file"));
        msg.push_text_delta("Done.");

        assert_eq!(msg.content.len(), 3);
        assert_eq!(msg.text_content(), "Let me check.Done.");
    }

    #[test]
    fn results_resolve_their_matching_call() {
        let first = ToolCallId::new();
        let second = ToolCallId::new();

        let mut msg = AssistantMessage::new();
        msg.push_tool_call(call(&first, "shell"));
        msg.push_tool_call(call(&second, "glob"));
        assert_eq!(msg.unresolved_tool_calls().len(), 2);

        msg.push_tool_result(result(&second, "main.rs"));
        let open = msg.unresolved_tool_calls();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, first);

        msg.push_tool_result(result(&first, "ok"));
        assert!(msg.unresolved_tool_calls().is_empty());
        assert!(msg.has_tool_calls());
    }

    #[test]
    fn part_order_survives_a_serde_round_trip() {
        let id = ToolCallId::new();
        let msg = Message::Assistant(AssistantMessage {
            content: vec![
                AssistantPart::Text { text: "checking".into() },
                AssistantPart::ToolCall(call(&id, "glob")),
                AssistantPart::ToolResult(result(&id, "main.rs")),
            ],
            stop_reason: Some(StopReason::ToolUse),
        });

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);

        let value = serde_json::to_value(&parsed).unwrap();
        let tags: Vec<&str> = value["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["type"].as_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["text", "tool_call", "tool_result"]);
    }

    #[test]
    fn is_error_defaults_false_on_deserialize() {
        let raw = r#"{"tool_call_id":"call_1","output":"ok"}"#;
        let part: ToolResultPart = serde_json::from_str(raw).unwrap();
        assert!(!part.is_error);
    }

    #[test]
    fn stop_reasons_use_snake_case_on_the_wire() {
        for (reason, wire) in [
            (StopReason::EndTurn, r#""end_turn""#),
            (StopReason::ToolUse, r#""tool_use""#),
            (StopReason::MaxTokens, r#""max_tokens""#),
            (StopReason::ContentFilter, r#""content_filter""#),
        ] {
            assert_eq!(serde_json::to_string(&reason).unwrap(), wire);
        }
    }
}
