//! Converts one span's prompt and completion attributes into the normalized
//! message sequence stored as a trajectory.
//!
//! Conversion is total: unusable attributes are skipped and unknown content
//! shapes fall back to their text rendering, so one bad span never stops a
//! batch.

use crate::literal::parse_python_literal;
use crate::span::{COMPLETION_PREFIX, PROMPT_PREFIX, Span};
use mk_core::messages::{Message, MessageRole, ToolCall};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;

const NO_CONTENT: &str = "(no content)";

static SYSTEM_REMINDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<system-reminder>.*?</system-reminder>").ok());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Keep `<system-reminder>` blocks in message text.
    pub retain_system_reminders: bool,
}

/// Prompt messages in index order, then completion messages in index order.
pub fn convert_span(span: &Span, options: ConvertOptions) -> Vec<Message> {
    let mut messages = Vec::new();
    for prefix in [PROMPT_PREFIX, COMPLETION_PREFIX] {
        for index in message_indices(span, prefix) {
            let Some(role) = span.attr_str(&format!("{prefix}{index}.role")) else {
                continue;
            };
            let Some(content) = span.attributes.get(&format!("{prefix}{index}.content")) else {
                continue;
            };
            messages.extend(convert_message(role, content));
        }
    }
    clean_messages(messages, options)
}

fn message_indices(span: &Span, prefix: &str) -> BTreeSet<usize> {
    span.attributes
        .keys()
        .filter_map(|key| {
            key.strip_prefix(prefix)?
                .strip_suffix(".role")?
                .parse::<usize>()
                .ok()
        })
        .collect()
}

/// Interprets string content holding JSON or a Python literal as structured
/// blocks. Anything else stays text.
pub fn parse_content(content: &Value) -> Value {
    let Value::String(text) = content else {
        return content.clone();
    };
    let trimmed = text.trim();
    if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
        return content.clone();
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .or_else(|| parse_python_literal(trimmed))
        .filter(|v| v.is_array() || v.is_object())
        .unwrap_or_else(|| content.clone())
}

#[derive(Default)]
struct Blocks {
    text: Vec<String>,
    thinking: Vec<String>,
    tool_calls: Vec<ToolCall>,
    tool_results: Vec<(String, String)>,
}

impl Blocks {
    fn collect(items: &[Value]) -> Self {
        let mut blocks = Blocks::default();
        for item in items {
            blocks.push(item);
        }
        blocks
    }

    fn push(&mut self, block: &Value) {
        let Value::Object(fields) = block else {
            let text = value_text(block);
            if !text.is_empty() {
                self.text.push(text);
            }
            return;
        };
        let field = |name: &str| fields.get(name).map(value_text).unwrap_or_default();

        match fields.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = field("text");
                if !text.is_empty() && text != NO_CONTENT {
                    self.text.push(text);
                }
            }
            Some("thinking") | Some("reasoning") => {
                let thinking = field("thinking");
                let thinking = if thinking.is_empty() { field("text") } else { thinking };
                if !thinking.is_empty() {
                    self.thinking.push(thinking);
                }
            }
            Some("tool_use") => {
                let arguments = fields
                    .get("input")
                    .map_or_else(|| "{}".to_string(), Value::to_string);
                self.tool_calls
                    .push(ToolCall::function(field("id"), field("name"), arguments));
            }
            Some("tool_result") => {
                self.tool_results
                    .push((field("tool_use_id"), tool_result_text(fields.get("content"))));
            }
            _ => {}
        }
    }
}

fn convert_message(role: &str, content: &Value) -> Vec<Message> {
    let role = MessageRole::from(role);
    let items = match parse_content(content) {
        Value::String(text) => return vec![Message::new(role, text)],
        Value::Array(items) => items,
        object @ Value::Object(_) if object.get("type").is_some() => vec![object],
        Value::Null => return vec![Message::new(role, "")],
        other => return vec![Message::new(role, other.to_string())],
    };
    let blocks = Blocks::collect(&items);
    let text = blocks.text.join("\n\n");

    match role {
        MessageRole::Assistant => {
            let mut message = Message::new(MessageRole::Assistant, text);
            if !blocks.thinking.is_empty() {
                message.thinking = Some(blocks.thinking.join("\n\n"));
            }
            message.tool_calls = blocks.tool_calls;
            vec![message]
        }
        MessageRole::User if !blocks.tool_results.is_empty() => {
            let mut messages: Vec<Message> = blocks
                .tool_results
                .into_iter()
                .map(|(id, content)| Message::tool_result(id, content))
                .collect();
            if !text.is_empty() {
                messages.push(Message::new(MessageRole::User, text));
            }
            messages
        }
        role => vec![Message::new(role, text)],
    }
}

/// Tool result content is a string, a list of text blocks or arbitrary JSON.
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item.get("text") {
                Some(text) => value_text(text),
                None => value_text(item),
            })
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => value_text(other),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn strip_system_reminders(text: &str) -> String {
    match SYSTEM_REMINDER.as_ref() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn clean_messages(messages: Vec<Message>, options: ConvertOptions) -> Vec<Message> {
    messages
        .into_iter()
        .filter_map(|mut message| {
            if !options.retain_system_reminders {
                message.content = strip_system_reminders(&message.content);
            }
            let keep = !message.is_empty() || message.tool_call_id.is_some();
            keep.then_some(message)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn span(attributes: Value) -> Span {
        Span::from_value(&json!({
            "name": "litellm_request",
            "context": {"trace_id": "t", "span_id": "s"},
            "attributes": attributes,
        }))
    }

    #[test]
    fn test_plain_prompt_and_completion() {
        let messages = convert_span(
            &span(json!({
                "gen_ai.prompt.1.role": "user",
                "gen_ai.prompt.1.content": "How far is Toronto from Montreal?",
                "gen_ai.prompt.0.role": "system",
                "gen_ai.prompt.0.content": "You are helpful.",
                "gen_ai.completion.0.role": "assistant",
                "gen_ai.completion.0.content": "About 540 km.",
            })),
            ConvertOptions::default(),
        );

        let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(messages[2].content, "About 540 km.");
    }

    #[test]
    fn test_structured_blocks() {
        let assistant = json!([
            {"type": "thinking", "thinking": "Need the weather tool."},
            {"type": "text", "text": "Checking."},
            {"type": "text", "text": "(no content)"},
            {"type": "tool_use", "id": "tu_1", "name": "weather", "input": {"city": "Oslo"}}
        ]);
        let tool_results = json!([
            {"type": "tool_result", "tool_use_id": "tu_1",
             "content": [{"type": "text", "text": "4C"}, {"type": "text", "text": "rain"}]}
        ]);

        let messages = convert_span(
            &span(json!({
                "gen_ai.prompt.0.role": "user",
                "gen_ai.prompt.0.content": "Weather in Oslo?",
                "gen_ai.prompt.1.role": "assistant",
                "gen_ai.prompt.1.content": assistant.to_string(),
                "gen_ai.prompt.2.role": "user",
                "gen_ai.prompt.2.content": tool_results.to_string(),
            })),
            ConvertOptions::default(),
        );

        assert_eq!(messages.len(), 3);
        let call = &messages[1];
        assert_eq!(call.role, MessageRole::Assistant);
        assert_eq!(call.content, "Checking.");
        assert_eq!(call.thinking.as_deref(), Some("Need the weather tool."));
        assert_eq!(
            call.tool_calls,
            vec![ToolCall::function("tu_1", "weather", r#"{"city":"Oslo"}"#)]
        );

        let result = &messages[2];
        assert_eq!(result.role, MessageRole::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some("tu_1"));
        assert_eq!(result.content, "4C\nrain");
    }

    #[test]
    fn test_python_literal_content() {
        let messages = convert_span(
            &span(json!({
                "gen_ai.completion.0.role": "assistant",
                "gen_ai.completion.0.content":
                    "[{'type': 'tool_use', 'id': 'a', 'name': 'ls', 'input': {'all': True}}]",
            })),
            ConvertOptions::default(),
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].tool_calls[0].function.arguments, r#"{"all":true}"#);
    }

    #[test]
    fn test_system_reminders_are_stripped_unless_retained() {
        let attributes = json!({
            "gen_ai.prompt.0.role": "user",
            "gen_ai.prompt.0.content":
                "Fix the bug<system-reminder>\nDo not mention this\n</system-reminder>",
            "gen_ai.prompt.1.role": "user",
            "gen_ai.prompt.1.content": "<system-reminder>only boilerplate</system-reminder>",
        });

        let stripped = convert_span(&span(attributes.clone()), ConvertOptions::default());
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped[0].content, "Fix the bug");

        let retained = convert_span(
            &span(attributes),
            ConvertOptions {
                retain_system_reminders: true,
            },
        );
        assert_eq!(retained.len(), 2);
        assert!(retained[1].content.contains("only boilerplate"));
    }

    #[test]
    fn test_malformed_attributes_degrade() {
        let messages = convert_span(
            &span(json!({
                "gen_ai.prompt.x.role": "user",
                "gen_ai.prompt.0.role": "user",
                "gen_ai.prompt.1.role": 5,
                "gen_ai.prompt.1.content": "dropped: role is not text",
                "gen_ai.prompt.2.role": "user",
                "gen_ai.prompt.2.content": "[not json",
                "gen_ai.prompt.3.role": "user",
                "gen_ai.prompt.3.content": {"unexpected": "shape"},
                "gen_ai.prompt.4.role": "user",
                "gen_ai.prompt.4.content": [1, {"type": "image"}],
            })),
            ConvertOptions::default(),
        );

        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["[not json", r#"{"unexpected":"shape"}"#, "1"]);
    }
}
