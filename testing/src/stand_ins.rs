//! Deterministic stand-ins for the external collaborators.

use async_trait::async_trait;
use errors::{StoreError, StoreResult};
use mk_core::messages::Message;
use mk_core::traits::{
    ConflictResolver, EmbeddingService, EntityStore, GuidelineGenerator, SharedStore,
};
use mk_core::types::{
    Entity, EntityQuery, GeneratedGuidelines, GuidelineDraft, Namespace, NamespaceSummary,
    NewEntity, ResolutionAction, SearchHit, StoreHealth, Verdict,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use sync::{Span, SpanPage, TraceSource, TraceSourceError};

/// Resolver that always answers with the same action, targeting the most
/// similar existing entity.
pub struct StaticResolver {
    action: ResolutionAction,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new(action: ResolutionAction) -> Self {
        Self {
            action,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConflictResolver for StaticResolver {
    async fn resolve(&self, candidate: &NewEntity, existing: &[Entity]) -> StoreResult<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(target) = existing.first() else {
            return Ok(Verdict::insert());
        };
        Ok(match self.action {
            ResolutionAction::Insert => Verdict::insert(),
            ResolutionAction::Discard => Verdict::discard(&target.id),
            ResolutionAction::Supersede => Verdict::supersede(&target.id),
            ResolutionAction::Merge => Verdict::merge(
                &target.id,
                format!("{} {}", target.content, candidate.content),
            ),
        })
    }
}

/// Resolver that returns a fixed verdict verbatim, including malformed ones.
pub struct FixedVerdictResolver(pub Verdict);

#[async_trait]
impl ConflictResolver for FixedVerdictResolver {
    async fn resolve(&self, _candidate: &NewEntity, _existing: &[Entity]) -> StoreResult<Verdict> {
        Ok(self.0.clone())
    }
}

/// Resolver whose decision engine is always unreachable.
#[derive(Default)]
pub struct UnavailableResolver {
    calls: AtomicUsize,
}

impl UnavailableResolver {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConflictResolver for UnavailableResolver {
    async fn resolve(&self, _candidate: &NewEntity, _existing: &[Entity]) -> StoreResult<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::collaborator("resolver", "connection refused"))
    }
}

/// Generator returning the same drafts for every conversation, except those
/// containing a configured failure marker.
pub struct ScriptedGenerator {
    output: GeneratedGuidelines,
    fail_marker: Option<String>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedGenerator {
    pub fn new(output: GeneratedGuidelines) -> Self {
        Self {
            output,
            fail_marker: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A generator proposing one guideline per call.
    pub fn single(content: &str, task_description: &str) -> Self {
        Self::new(GeneratedGuidelines {
            guidelines: vec![GuidelineDraft {
                content: content.to_string(),
                rationale: "observed in a trajectory".to_string(),
                category: "strategy".to_string(),
                trigger: task_description.to_string(),
            }],
            task_description: Some(task_description.to_string()),
        })
    }

    pub fn empty() -> Self {
        Self::new(GeneratedGuidelines::default())
    }

    pub fn failing_when(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl GuidelineGenerator for ScriptedGenerator {
    async fn generate(&self, messages: &[Message]) -> StoreResult<GeneratedGuidelines> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        if let Some(marker) = &self.fail_marker {
            if messages.iter().any(|m| m.content.contains(marker.as_str())) {
                return Err(StoreError::collaborator("generator", "scripted failure"));
            }
        }
        Ok(self.output.clone())
    }
}

/// Embedding service that always fails.
pub struct UnavailableEmbedder {
    pub dimension: usize,
}

#[async_trait]
impl EmbeddingService for UnavailableEmbedder {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, Self::Error> {
        Err("embedding service unreachable".into())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Serves a fixed list of raw spans. The cursor is the offset of the next
/// span.
#[derive(Default)]
pub struct InMemoryTraceSource {
    spans: Mutex<Vec<Value>>,
    failure: Mutex<Option<TraceSourceError>>,
    requests: AtomicUsize,
}

impl InMemoryTraceSource {
    pub fn new(spans: Vec<Value>) -> Self {
        Self {
            spans: Mutex::new(spans),
            ..Self::default()
        }
    }

    pub fn push(&self, span: Value) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span);
    }

    /// Makes every following fetch fail with `error`.
    pub fn fail_with(&self, error: TraceSourceError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Lets fetches succeed again.
    pub fn recover(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TraceSource for InMemoryTraceSource {
    async fn fetch_page(
        &self,
        _project: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<SpanPage, TraceSourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(error);
        }

        let start = match cursor {
            None => 0,
            Some(c) => c.parse::<usize>().map_err(|_| TraceSourceError::Decode {
                reason: format!("invalid cursor `{c}`"),
            })?,
        };
        let spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);
        let end = start.saturating_add(limit).min(spans.len());
        let page = spans.get(start..end).unwrap_or_default();

        Ok(SpanPage {
            spans: page.iter().map(Span::from_value).collect(),
            next_cursor: (end < spans.len()).then(|| end.to_string()),
        })
    }
}

/// Store whose searches fail as a backend outage while switched on. Every
/// other operation goes to the wrapped store.
pub struct SearchOutageStore {
    inner: SharedStore,
    outage: AtomicBool,
}

impl SearchOutageStore {
    pub fn new(inner: SharedStore) -> Self {
        Self {
            inner,
            outage: AtomicBool::new(false),
        }
    }

    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityStore for SearchOutageStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn ready(&self) -> StoreHealth {
        self.inner.ready().await
    }

    async fn create_namespace(&self, id: Option<&str>) -> StoreResult<Namespace> {
        self.inner.create_namespace(id).await
    }

    async fn get_namespace(&self, id: &str) -> StoreResult<NamespaceSummary> {
        self.inner.get_namespace(id).await
    }

    async fn delete_namespace(&self, id: &str) -> StoreResult<()> {
        self.inner.delete_namespace(id).await
    }

    async fn list_namespaces(&self) -> StoreResult<Vec<NamespaceSummary>> {
        self.inner.list_namespaces().await
    }

    async fn add_entity(&self, namespace_id: &str, entity: NewEntity) -> StoreResult<Entity> {
        self.inner.add_entity(namespace_id, entity).await
    }

    async fn get_entity(&self, namespace_id: &str, entity_id: &str) -> StoreResult<Entity> {
        self.inner.get_entity(namespace_id, entity_id).await
    }

    async fn delete_entity(&self, namespace_id: &str, entity_id: &str) -> StoreResult<()> {
        self.inner.delete_entity(namespace_id, entity_id).await
    }

    async fn list_entities(
        &self,
        namespace_id: &str,
        query: &EntityQuery,
    ) -> StoreResult<Vec<Entity>> {
        self.inner.list_entities(namespace_id, query).await
    }

    async fn search_entities(
        &self,
        namespace_id: &str,
        text: &str,
        query: &EntityQuery,
        limit: usize,
    ) -> StoreResult<Vec<SearchHit>> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::backend(self.backend_name(), "search index offline"));
        }
        self.inner.search_entities(namespace_id, text, query, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_source_paginates() {
        let source =
            InMemoryTraceSource::new((0..5).map(|i| json!({"name": format!("s{i}")})).collect());

        let first = source.fetch_page("p", 2, None).await.unwrap();
        assert_eq!(first.spans.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let last = source.fetch_page("p", 10, Some("4")).await.unwrap();
        assert_eq!(last.spans[0].name, "s4");
        assert!(last.next_cursor.is_none());

        let beyond = source.fetch_page("p", 10, Some("9")).await.unwrap();
        assert!(beyond.spans.is_empty());
        assert_eq!(source.requests(), 3);
    }

    #[tokio::test]
    async fn test_in_memory_source_failure_and_recovery() {
        let source = InMemoryTraceSource::default();
        source.fail_with(TraceSourceError::Request {
            reason: "connection refused".to_string(),
        });
        assert!(source.fetch_page("p", 10, None).await.is_err());

        source.recover();
        source.push(json!({"name": "late"}));
        let page = source.fetch_page("p", 10, None).await.unwrap();
        assert_eq!(page.spans[0].name, "late");
    }

    #[test]
    fn test_poisoned_generator_still_counts_calls() {
        let generator = std::sync::Arc::new(ScriptedGenerator::empty());
        let poisoner = generator.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.seen.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert_eq!(generator.calls(), 0);
    }
}
