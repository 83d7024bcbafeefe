//! Prompt templates for the resolution, generation and consolidation calls.

use mk_core::messages::{Message, MessageRole};
use mk_core::types::{Entity, NewEntity};
use serde_json::json;

pub const RESOLUTION_SYSTEM_PROMPT: &str = "You maintain a knowledge base of reusable \
entities for AI agents. Given a candidate entity and the most similar existing entities, \
decide how the candidate should be stored. Respond with a single JSON object and nothing \
else.";

pub const GENERATION_SYSTEM_PROMPT: &str = "You analyse AI agent conversations and extract \
short, actionable guidelines that would help an agent perform similar tasks better in the \
future. Respond with a single JSON object and nothing else.";

pub const CONSOLIDATION_SYSTEM_PROMPT: &str = "You curate guidelines for AI agents. Combine \
overlapping guidelines into fewer, non-redundant ones without losing any distinct advice. \
Respond with a single JSON object and nothing else.";

const GUIDELINE_SCHEMA: &str = r#"{
  "task_description": "<one sentence describing the task the agent worked on>",
  "guidelines": [
    {
      "content": "<the guideline, phrased as an instruction>",
      "rationale": "<why it helps>",
      "category": "strategy | recovery | optimization",
      "trigger": "<when the guideline applies>"
    }
  ]
}"#;

pub fn resolution_prompt(candidate: &NewEntity, existing: &[Entity]) -> String {
    let candidate_json = json!({
        "type": candidate.kind.as_str(),
        "content": candidate.content,
    });
    let existing_json: Vec<_> = existing
        .iter()
        .map(|e| json!({ "id": e.id, "type": e.kind.as_str(), "content": e.content }))
        .collect();

    format!(
        "Existing entities:\n{existing}\n\nCandidate entity:\n{candidate}\n\n\
         Choose exactly one action:\n\
         - \"insert\": the candidate covers new ground. Store it as a new entity.\n\
         - \"merge\": the candidate overlaps an existing entity. Provide `merged_content` \
         combining both and the `target_id` of the entity it replaces.\n\
         - \"supersede\": the candidate makes an existing entity wrong or stale. Provide the \
         `target_id` of the stale entity.\n\
         - \"discard\": the candidate repeats an existing entity with nothing new. Provide \
         the `target_id` of the duplicate.\n\n\
         Answer with JSON of the form \
         {{\"action\": \"...\", \"target_id\": \"...\", \"merged_content\": \"...\"}}.",
        existing = serde_json::to_string_pretty(&existing_json).unwrap_or_default(),
        candidate = serde_json::to_string_pretty(&candidate_json).unwrap_or_default(),
    )
}

pub fn generation_prompt(messages: &[Message]) -> String {
    format!(
        "Below is an agent conversation in Markdown.\n\n{trajectory}\n\n\
         Extract the guidelines an agent should follow next time it works on a similar \
         task. Return an empty list if nothing is worth keeping. Answer with JSON of the \
         form:\n{GUIDELINE_SCHEMA}",
        trajectory = messages_to_markdown(messages),
    )
}

pub fn consolidation_prompt(task_descriptions: &[String], guidelines: &[Entity]) -> String {
    let guidelines_json: Vec<_> = guidelines
        .iter()
        .map(|e| {
            let payload = e.as_guideline();
            json!({
                "content": e.content,
                "rationale": payload.and_then(|p| p.rationale.clone()).unwrap_or_default(),
                "category": payload
                    .and_then(|p| p.category)
                    .map_or_else(|| "strategy".to_string(), |c| c.to_string()),
                "trigger": payload.and_then(|p| p.trigger.clone()).unwrap_or_default(),
            })
        })
        .collect();

    let tasks = task_descriptions
        .iter()
        .map(|t| format!("- {t}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "These guidelines were learned on closely related tasks:\n{tasks}\n\n\
         Guidelines:\n{guidelines}\n\n\
         Combine them into the smallest set of guidelines that keeps every distinct piece \
         of advice. Answer with JSON of the form:\n{GUIDELINE_SCHEMA}",
        guidelines = serde_json::to_string_pretty(&guidelines_json).unwrap_or_default(),
    )
}

/// Renders a normalized conversation as Markdown, one section per message.
pub fn messages_to_markdown(messages: &[Message]) -> String {
    let mut lines = Vec::new();

    for message in messages {
        lines.push(format!("## {}", title_case(&message.role)));

        if let Some(thinking) = message.thinking.as_deref().filter(|t| !t.is_empty()) {
            lines.push(format!("*Thinking*: {thinking}"));
        }
        if !message.content.is_empty() {
            if message.role == MessageRole::Tool {
                lines.push(format!(
                    "**Tool Result** ({}):",
                    message.tool_call_id.as_deref().unwrap_or("unknown")
                ));
                lines.push("```".to_string());
                lines.push(message.content.clone());
                lines.push("```".to_string());
            } else {
                lines.push(message.content.clone());
            }
        }
        for call in &message.tool_calls {
            lines.push(format!("**Tool Call**: `{}`", call.function.name));
            lines.push("```json".to_string());
            lines.push(call.function.arguments.clone());
            lines.push("```".to_string());
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn title_case(role: &MessageRole) -> String {
    let raw = role.as_str();
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Unknown".to_string(),
    }
}
