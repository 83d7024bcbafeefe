use crate::error::{GenerationError, LlmCallError};
use crate::llm::{CallPolicy, call_json, parse_llm_json};
use crate::prompts::{GENERATION_SYSTEM_PROMPT, generation_prompt};
use async_trait::async_trait;
use config::LlmConfig;
use errors::StoreResult;
use mk_core::messages::Message;
use mk_core::traits::{GuidelineGenerator, SharedLlm};
use mk_core::types::{GeneratedGuidelines, GuidelineDraft};
use serde::Deserialize;
use tracing::{debug, instrument};

#[derive(Deserialize)]
#[serde(untagged)]
enum GenerationResponse {
    Listed(Vec<GuidelineDraft>),
    Wrapped(GeneratedGuidelines),
}

/// Decodes a generation answer. A bare list of guidelines is accepted, and
/// drafts without content are dropped.
pub(crate) fn decode_guidelines(raw: &str) -> Result<GeneratedGuidelines, LlmCallError> {
    let mut generated = match parse_llm_json(raw)? {
        GenerationResponse::Listed(guidelines) => GeneratedGuidelines {
            guidelines,
            task_description: None,
        },
        GenerationResponse::Wrapped(generated) => generated,
    };
    generated.guidelines.retain(|g| !g.content.trim().is_empty());
    generated.task_description = generated
        .task_description
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    Ok(generated)
}

/// Guideline generator backed by a language model.
pub struct LlmGuidelineGenerator {
    llm: SharedLlm,
    policy: CallPolicy,
}

impl LlmGuidelineGenerator {
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
impl GuidelineGenerator for LlmGuidelineGenerator {
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    async fn generate(&self, messages: &[Message]) -> StoreResult<GeneratedGuidelines> {
        if messages.is_empty() {
            return Ok(GeneratedGuidelines::default());
        }

        let prompt = generation_prompt(messages);
        let generated = call_json(
            &self.llm,
            self.policy,
            GENERATION_SYSTEM_PROMPT,
            &prompt,
            decode_guidelines,
        )
        .await
        .map_err(GenerationError::from)?;

        debug!(
            guidelines = generated.guidelines.len(),
            task = ?generated.task_description,
            "Generated guidelines"
        );
        Ok(generated)
    }
}
