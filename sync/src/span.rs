//! Upstream spans, read leniently: a span with missing or mistyped fields
//! still yields a value, with the unusable parts left empty.

use mk_core::types::{Metadata, TokenUsage};
use serde::Serialize;
use serde_json::Value;

pub const PROMPT_PREFIX: &str = "gen_ai.prompt.";
pub const COMPLETION_PREFIX: &str = "gen_ai.completion.";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Span {
    pub name: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub start_time: Option<String>,
    pub status_code: Option<String>,
    /// Flattened attributes keyed by dotted path.
    pub attributes: Metadata,
}

/// One page of spans and the cursor of the next page, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanPage {
    pub spans: Vec<Span>,
    pub next_cursor: Option<String>,
}

impl SpanPage {
    /// Decodes a `{"data": [...], "next_cursor": ...}` response body.
    pub fn from_value(value: &Value) -> Option<Self> {
        let data = value.get("data")?.as_array()?;
        Some(Self {
            spans: data.iter().map(Span::from_value).collect(),
            next_cursor: value
                .get("next_cursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }
}

impl Span {
    pub fn from_value(value: &Value) -> Self {
        let context = value.get("context");
        let mut attributes = Metadata::new();
        if let Some(Value::Object(raw)) = value.get("attributes") {
            flatten_into(&mut attributes, "", raw);
        }

        Self {
            name: string_field(Some(value), "name").unwrap_or_default(),
            trace_id: string_field(context, "trace_id"),
            span_id: string_field(context, "span_id"),
            start_time: string_field(Some(value), "start_time"),
            status_code: string_field(Some(value), "status_code"),
            attributes,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status_code
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("error"))
    }

    pub fn has_prompt(&self) -> bool {
        self.attributes.keys().any(|k| k.starts_with(PROMPT_PREFIX))
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        match self.attributes.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn model(&self) -> String {
        self.attr_str("gen_ai.request.model")
            .or_else(|| self.attr_str("llm.model_name"))
            .unwrap_or("unknown")
            .to_string()
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.attr_u64("gen_ai.usage.prompt_tokens"),
            completion_tokens: self.attr_u64("gen_ai.usage.completion_tokens"),
            total_tokens: self
                .attr_u64("llm.usage.total_tokens")
                .or_else(|| self.attr_u64("gen_ai.usage.total_tokens")),
        }
    }
}

fn string_field(value: Option<&Value>, key: &str) -> Option<String> {
    match value?.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Nested attribute namespaces become dotted keys. Values under an already
/// dotted key or a `content` key are kept whole.
fn flatten_into(out: &mut Metadata, prefix: &str, object: &serde_json::Map<String, Value>) {
    for (key, value) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) if !key.contains('.') && key != "content" => {
                flatten_into(out, &path, inner)
            }
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}
