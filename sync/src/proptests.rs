#[cfg(test)]
mod proptests {
    use crate::converter::{ConvertOptions, convert_span, parse_content};
    use crate::literal::parse_python_literal;
    use crate::span::Span;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "\\PC*".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::hash_map("[a-z_.0-9]{1,12}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn arb_block() -> impl Strategy<Value = Value> {
        prop_oneof![
            "\\PC*".prop_map(|t| json!({"type": "text", "text": t})),
            "\\PC*".prop_map(|t| json!({"type": "thinking", "thinking": t})),
            ("[a-z0-9]{0,8}", "[a-z_]{0,8}", arb_json()).prop_map(|(id, name, input)| {
                json!({"type": "tool_use", "id": id, "name": name, "input": input})
            }),
            ("[a-z0-9]{0,8}", arb_json()).prop_map(|(id, content)| {
                json!({"type": "tool_result", "tool_use_id": id, "content": content})
            }),
            arb_json(),
        ]
    }

    proptest! {
        #[test]
        fn test_convert_span_never_panics(raw in arb_json()) {
            let span = Span::from_value(&json!({
                "name": "litellm_request",
                "context": {"trace_id": "t", "span_id": "s"},
                "attributes": raw,
            }));
            let _ = convert_span(&span, ConvertOptions::default());
        }

        #[test]
        fn test_structured_messages_never_panic(
            roles in prop::collection::vec("user|assistant|system|tool|[a-z]{0,6}", 1..5),
            blocks in prop::collection::vec(prop::collection::vec(arb_block(), 0..4), 1..5),
        ) {
            let mut attributes = serde_json::Map::new();
            for (i, (role, content)) in roles.iter().zip(blocks.iter()).enumerate() {
                attributes.insert(format!("gen_ai.prompt.{i}.role"), json!(role));
                attributes.insert(
                    format!("gen_ai.prompt.{i}.content"),
                    Value::Array(content.clone()),
                );
            }
            let span = Span::from_value(&json!({
                "name": "litellm_request",
                "attributes": Value::Object(attributes),
            }));
            let messages = convert_span(&span, ConvertOptions::default());
            for message in &messages {
                prop_assert!(!message.is_empty() || message.tool_call_id.is_some());
            }
        }

        #[test]
        fn test_lenient_parsing_never_panics(text in "\\PC*") {
            let _ = parse_python_literal(&text);
            let _ = parse_content(&Value::String(text));
        }
    }
}
