use async_trait::async_trait;
use mk_core::traits::LlmService;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Canned LLM responses for tests.
///
/// A response is chosen by the first registered needle contained in the
/// prompt, else the default response. The first `failures` calls fail.
pub struct MockLlmService {
    responses: RwLock<Vec<(String, String)>>,
    default: RwLock<Option<String>>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            responses: RwLock::new(Vec::new()),
            default: RwLock::new(None),
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_default(response: impl Into<String>) -> Self {
        Self {
            default: RwLock::new(Some(response.into())),
            ..Self::new()
        }
    }

    /// Fails the next `count` calls before answering normally.
    pub fn failing_first(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    pub async fn add_response(&self, needle: impl Into<String>, response: impl Into<String>) {
        self.responses
            .write()
            .await
            .push((needle.into(), response.into()));
    }

    pub async fn set_response(&self, response: &str) {
        *self.default.write().await = Some(response.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlmService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    async fn generate(&self, _system: &str, prompt: &str) -> Result<String, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err("mock LLM failure".into());
        }

        let responses = self.responses.read().await;
        if let Some((_, response)) = responses.iter().find(|(needle, _)| prompt.contains(needle)) {
            return Ok(response.clone());
        }
        match self.default.read().await.as_ref() {
            Some(response) => Ok(response.clone()),
            None => Ok(format!("Mock response for: {prompt}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responses_by_needle_then_default() {
        let llm = MockLlmService::with_default("fallback");
        llm.add_response("merge", "{\"action\":\"merge\"}").await;

        assert_eq!(
            llm.generate("", "please merge these").await.unwrap(),
            "{\"action\":\"merge\"}"
        );
        assert_eq!(llm.generate("", "anything else").await.unwrap(), "fallback");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_failing_first_calls() {
        let llm = MockLlmService::with_default("ok").failing_first(2);
        assert!(llm.generate("", "x").await.is_err());
        assert!(llm.generate("", "x").await.is_err());
        assert_eq!(llm.generate("", "x").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_echo_without_responses() {
        let llm = MockLlmService::new();
        assert_eq!(
            llm.generate("", "hello").await.unwrap(),
            "Mock response for: hello"
        );
    }
}
