use crate::error::{LlmCallError, ResolutionError};
use crate::llm::{CallPolicy, call_json, parse_llm_json};
use crate::prompts::{RESOLUTION_SYSTEM_PROMPT, resolution_prompt};
use async_trait::async_trait;
use config::LlmConfig;
use errors::StoreResult;
use mk_core::traits::{ConflictResolver, SharedLlm};
use mk_core::types::{Entity, NewEntity, ResolutionAction, Verdict};
use serde::Deserialize;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(alias = "event")]
    action: String,
    #[serde(default, alias = "id")]
    target_id: Option<String>,
    #[serde(default, alias = "content")]
    merged_content: Option<String>,
}

fn parse_action(action: &str) -> Option<ResolutionAction> {
    match action.trim().to_ascii_lowercase().as_str() {
        "insert" | "add" => Some(ResolutionAction::Insert),
        "merge" | "update" => Some(ResolutionAction::Merge),
        "supersede" | "replace" => Some(ResolutionAction::Supersede),
        "discard" | "none" => Some(ResolutionAction::Discard),
        _ => None,
    }
}

fn decode_verdict(raw: &str) -> Result<Verdict, LlmCallError> {
    let parsed: RawVerdict = parse_llm_json(raw)?;
    let action = parse_action(&parsed.action).ok_or_else(|| LlmCallError::Malformed {
        reason: format!("unknown action `{}`", parsed.action),
    })?;

    Ok(Verdict {
        action,
        merged_content: parsed.merged_content.filter(|c| !c.trim().is_empty()),
        target_id: parsed.target_id.filter(|id| !id.is_empty()),
    })
}

/// Decision engine backed by a language model.
pub struct LlmResolver {
    llm: SharedLlm,
    policy: CallPolicy,
}

impl LlmResolver {
    pub fn new(llm: SharedLlm, config: &LlmConfig) -> Self {
        Self {
            llm,
            policy: CallPolicy::from_config(config),
        }
    }

    pub fn with_policy(llm: SharedLlm, policy: CallPolicy) -> Self {
        Self { llm, policy }
    }
}

#[async_trait]
impl ConflictResolver for LlmResolver {
    #[instrument(
        skip(self, candidate, existing),
        fields(kind = %candidate.kind, neighbours = existing.len())
    )]
    async fn resolve(&self, candidate: &NewEntity, existing: &[Entity]) -> StoreResult<Verdict> {
        let prompt = resolution_prompt(candidate, existing);
        let verdict = call_json(
            &self.llm,
            self.policy,
            RESOLUTION_SYSTEM_PROMPT,
            &prompt,
            decode_verdict,
        )
        .await
        .map_err(ResolutionError::from)?;

        debug!(action = %verdict.action, target = ?verdict.target_id, "Decision engine verdict");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use errors::StoreError;
    use memory::llm::MockLlmService;
    use std::sync::Arc;
    use std::time::Duration;

    fn quick() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 2,
        }
    }

    #[test]
    fn test_decode_verdict_accepts_aliases() {
        let verdict =
            decode_verdict(r#"{"event": "UPDATE", "id": "3", "content": "both"}"#).unwrap();
        assert_eq!(verdict, Verdict::merge("3", "both"));

        let verdict =
            decode_verdict("```json\n{\"action\": \"discard\", \"target_id\": \"1\"}\n```")
                .unwrap();
        assert_eq!(verdict, Verdict::discard("1"));

        let verdict = decode_verdict(r#"{"event": "NONE"}"#).unwrap();
        assert_eq!(verdict.action, ResolutionAction::Discard);
        assert_eq!(verdict.target_id, None);

        let verdict = decode_verdict(r#"{"action": "insert", "target_id": ""}"#).unwrap();
        assert_eq!(verdict, Verdict::insert());
    }

    #[test]
    fn test_decode_verdict_rejects_unknown_action() {
        let err = decode_verdict(r#"{"action": "shrug"}"#).unwrap_err();
        assert!(matches!(err, LlmCallError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_resolver_retries_failed_call() {
        let llm = Arc::new(
            MockLlmService::with_default(r#"{"action": "supersede", "target_id": "9"}"#)
                .failing_first(1),
        );
        let resolver = LlmResolver::with_policy(llm.clone(), quick());
        let candidate = NewEntity::guideline("Use km", Default::default());

        let verdict = resolver.resolve(&candidate, &[]).await.unwrap();
        assert_eq!(verdict, Verdict::supersede("9"));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_resolver_reports_malformed_answers_as_unavailable() {
        let llm = Arc::new(MockLlmService::with_default("no json here"));
        let resolver = LlmResolver::with_policy(llm.clone(), quick());
        let candidate = NewEntity::guideline("Use km", Default::default());

        let err = resolver.resolve(&candidate, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::CollaboratorUnavailable { .. }));
        assert_eq!(llm.calls(), 2);
    }
}
