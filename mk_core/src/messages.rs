//! Conversational message model shared by the trace converter, the guideline
//! generator and trajectory entities.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
    Other(String),
}

impl MessageRole {
    pub fn as_str(&self) -> &str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for MessageRole {
    fn from(value: String) -> Self {
        match value.as_str() {
            "system" => MessageRole::System,
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            _ => MessageRole::Other(value),
        }
    }
}

impl From<&str> for MessageRole {
    fn from(value: &str) -> Self {
        MessageRole::from(value.to_string())
    }
}

impl From<MessageRole> for String {
    fn from(value: MessageRole) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: default_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A single normalized conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: impl Into<MessageRole>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            thinking: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }

    /// A message is empty when it carries no text, thinking or tool calls.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
            && self.thinking.as_deref().is_none_or(|t| t.trim().is_empty())
            && self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization_omits_empty_fields() {
        let msg = Message::new("user", "hello");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"role": "user", "content": "hello"})
        );
    }

    #[test]
    fn test_tool_call_shape() {
        let mut msg = Message::new(MessageRole::Assistant, "");
        msg.tool_calls
            .push(ToolCall::function("call_1", "search", r#"{"q":"rust"}"#));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(value["tool_calls"][0]["function"]["name"], "search");
        assert!(!msg.is_empty());
    }

    #[test]
    fn test_unknown_role_is_preserved() {
        let msg: Message = serde_json::from_value(json!({"role": "developer", "content": "x"}))
            .unwrap();
        assert_eq!(msg.role, MessageRole::Other("developer".to_string()));
        assert_eq!(serde_json::to_value(&msg).unwrap()["role"], "developer");
    }

    #[test]
    fn test_is_empty() {
        assert!(Message::new("assistant", "  ").is_empty());
        let mut msg = Message::new("assistant", "");
        msg.thinking = Some("reasoning".into());
        assert!(!msg.is_empty());
        assert!(!Message::tool_result("call_1", "ok").is_empty());
    }
}
