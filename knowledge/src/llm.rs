//! Shared plumbing for structured calls to a language model: response
//! cleaning, JSON decoding, per-attempt timeouts and retries.

use crate::error::LlmCallError;
use config::LlmConfig;
use mk_core::traits::SharedLlm;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, warn};

const RETRY_INTERVAL_MS: u64 = 200;

static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z0-9]*\s*(.*?)\s*```$").ok());

static REASONING_BLOCK: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:think(?:ing)?|reflection)>.*?</(?:think(?:ing)?|reflection)>").ok()
});

/// Strips a surrounding Markdown code fence and any reasoning blocks so the
/// remainder can be decoded as JSON.
pub fn clean_llm_response(content: &str) -> String {
    let trimmed = content.trim();
    let inner = CODE_FENCE
        .as_ref()
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str().trim());

    match REASONING_BLOCK.as_ref() {
        Some(re) => re.replace_all(inner, "").trim().to_string(),
        None => inner.to_string(),
    }
}

pub fn parse_llm_json<T: DeserializeOwned>(content: &str) -> Result<T, LlmCallError> {
    let cleaned = clean_llm_response(content);
    serde_json::from_str(&cleaned).map_err(|e| LlmCallError::Malformed {
        reason: e.to_string(),
    })
}

/// Attempt budget for one logical LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl CallPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// Calls the model and decodes its answer, retrying transport failures,
/// timeouts and undecodable responses up to the policy's attempt budget.
pub async fn call_json<T, F>(
    llm: &SharedLlm,
    policy: CallPolicy,
    system: &str,
    prompt: &str,
    decode: F,
) -> Result<T, LlmCallError>
where
    F: Fn(&str) -> Result<T, LlmCallError>,
{
    let strategy = FixedInterval::from_millis(RETRY_INTERVAL_MS)
        .take(policy.max_attempts.saturating_sub(1) as usize);
    let decode = &decode;
    let mut attempt = 0u32;

    Retry::spawn(strategy, || {
        attempt += 1;
        let current = attempt;
        async move {
            let result = match tokio::time::timeout(policy.timeout, llm.generate(system, prompt))
                .await
            {
                Err(_) => Err(LlmCallError::TimedOut {
                    timeout_ms: policy.timeout.as_millis() as u64,
                }),
                Ok(Err(e)) => Err(LlmCallError::Unavailable {
                    reason: e.to_string(),
                }),
                Ok(Ok(raw)) => decode(&raw),
            };

            match &result {
                Ok(_) => debug!(attempt = current, "LLM call succeeded"),
                Err(e) => warn!(
                    attempt = current,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "LLM call attempt failed"
                ),
            }
            result
        }
    })
    .await
}
