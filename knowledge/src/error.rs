use errors::StoreError;
use thiserror::Error;

/// Failure of one call to a language model, after retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmCallError {
    #[error("LLM unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("LLM call timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("Malformed LLM response: {reason}")]
    Malformed { reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Decision engine call failed: {0}")]
    Call(#[from] LlmCallError),

    #[error("Rejected verdict: {reason}")]
    InvalidVerdict { reason: String },
}

impl ResolutionError {
    pub fn invalid_verdict(reason: impl Into<String>) -> Self {
        ResolutionError::InvalidVerdict {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Guideline generation failed: {0}")]
    Call(#[from] LlmCallError),

    #[error("Embedding of task description failed: {reason}")]
    Embedding { reason: String },
}

impl From<ResolutionError> for StoreError {
    fn from(err: ResolutionError) -> Self {
        StoreError::collaborator("resolver", err)
    }
}

impl From<GenerationError> for StoreError {
    fn from(err: GenerationError) -> Self {
        StoreError::collaborator("generator", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_map_to_collaborator_unavailable() {
        let err: StoreError =
            ResolutionError::Call(LlmCallError::TimedOut { timeout_ms: 50 }).into();
        assert_eq!(
            err.to_string(),
            "Collaborator resolver unavailable: Decision engine call failed: LLM call timed out after 50ms"
        );
        assert!(!err.is_caller_error());
        assert!(!err.is_hard_failure());

        let err: StoreError = GenerationError::Call(LlmCallError::Malformed {
            reason: "expected value".to_string(),
        })
        .into();
        assert!(matches!(
            err,
            StoreError::CollaboratorUnavailable { ref collaborator, .. } if collaborator == "generator"
        ));
    }
}
