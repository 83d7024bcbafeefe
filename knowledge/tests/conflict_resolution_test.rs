use config::{LlmConfig, ResolutionConfig};
use knowledge::{ConflictResolutionEngine, LlmResolver, ResolutionOutcome};
use memory::IndexedEntityStore;
use memory::backends::InMemoryVectorBackend;
use memory::embedding::MockEmbeddingService;
use memory::llm::MockLlmService;
use mk_core::traits::{ConflictResolver, SharedStore};
use mk_core::types::{
    EntityKind, EntityQuery, GuidelinePayload, Metadata, NewEntity, ResolutionAction, Verdict,
};
use serde_json::json;
use std::sync::Arc;
use storage::{FileEntityStore, NamespaceRegistry};
use tempfile::TempDir;
use testing::{FixedVerdictResolver, StaticResolver, UnavailableResolver};
use tracing_test::traced_test;

const KM: &str = "Use km for Canada distances";

async fn filesystem_store() -> (TempDir, SharedStore) {
    let dir = TempDir::new().unwrap();
    let store: SharedStore = Arc::new(FileEntityStore::open(dir.path()).unwrap());
    store.create_namespace(Some("demo")).await.unwrap();
    (dir, store)
}

async fn indexed_store() -> SharedStore {
    let store: SharedStore = Arc::new(IndexedEntityStore::new(
        NamespaceRegistry::in_memory().await.unwrap(),
        Arc::new(InMemoryVectorBackend::new(256)),
        Arc::new(MockEmbeddingService::new(256)),
    ));
    store.create_namespace(Some("demo")).await.unwrap();
    store
}

fn guideline(content: &str) -> NewEntity {
    NewEntity::guideline(
        content,
        GuidelinePayload {
            trigger: Some("Canada distances".to_string()),
            ..Default::default()
        },
    )
}

async fn count(store: &SharedStore) -> usize {
    store.get_namespace("demo").await.unwrap().entity_count
}

fn engine(store: &SharedStore, resolver: Arc<dyn ConflictResolver>) -> ConflictResolutionEngine {
    ConflictResolutionEngine::new(store.clone(), resolver, ResolutionConfig::default())
}

#[tokio::test]
async fn test_disabled_resolution_always_inserts() {
    let (_dir, store) = filesystem_store().await;
    let resolver = Arc::new(StaticResolver::new(ResolutionAction::Discard));
    let engine = engine(&store, resolver.clone());

    for expected in 1..=3 {
        let outcome = engine.submit("demo", guideline(KM), false).await.unwrap();
        assert_eq!(outcome.action(), ResolutionAction::Insert);
        assert_eq!(count(&store).await, expected);
    }
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn test_no_neighbours_skips_decision_engine() {
    let (_dir, store) = filesystem_store().await;
    let resolver = Arc::new(StaticResolver::new(ResolutionAction::Discard));
    let engine = engine(&store, resolver.clone());

    let outcome = engine.submit("demo", guideline(KM), true).await.unwrap();
    assert!(matches!(outcome, ResolutionOutcome::Inserted { .. }));
    assert_eq!(resolver.calls(), 0);
    assert_eq!(count(&store).await, 1);
}

#[tokio::test]
async fn test_discard_leaves_count_unchanged() {
    let (_dir, store) = filesystem_store().await;
    let existing = store.add_entity("demo", guideline(KM)).await.unwrap();
    let resolver = Arc::new(StaticResolver::new(ResolutionAction::Discard));
    let engine = engine(&store, resolver.clone());

    let outcome = engine.submit("demo", guideline(KM), true).await.unwrap();
    assert_eq!(
        outcome,
        ResolutionOutcome::Discarded {
            duplicate_of: existing.id.clone()
        }
    );
    assert_eq!(resolver.calls(), 1);
    assert_eq!(count(&store).await, 1);
}

#[tokio::test]
async fn test_discard_without_target_writes_nothing() {
    let untargeted = [
        Verdict {
            action: ResolutionAction::Discard,
            merged_content: None,
            target_id: None,
        },
        Verdict::discard("999"),
    ];

    for verdict in untargeted {
        let (_dir, store) = filesystem_store().await;
        let existing = store.add_entity("demo", guideline(KM)).await.unwrap();
        let engine = engine(&store, Arc::new(FixedVerdictResolver(verdict.clone())));

        let outcome = engine.submit("demo", guideline(KM), true).await.unwrap();
        assert_eq!(
            outcome,
            ResolutionOutcome::Discarded {
                duplicate_of: existing.id.clone()
            },
            "{verdict:?}"
        );
        assert_eq!(count(&store).await, 1);
    }
}

#[tokio::test]
async fn test_near_identical_guideline_is_discarded_on_indexed_store() {
    let store = indexed_store().await;
    store.add_entity("demo", guideline(KM)).await.unwrap();
    let engine = engine(&store, Arc::new(StaticResolver::new(ResolutionAction::Discard)));

    let outcome = engine
        .submit("demo", guideline("use KM for canada distances."), true)
        .await
        .unwrap();
    assert_eq!(outcome.action(), ResolutionAction::Discard);
    assert_eq!(count(&store).await, 1);
}

#[tokio::test]
async fn test_unrelated_candidate_below_threshold_is_inserted() {
    let store = indexed_store().await;
    store.add_entity("demo", guideline(KM)).await.unwrap();
    let resolver = Arc::new(StaticResolver::new(ResolutionAction::Discard));
    let engine = ConflictResolutionEngine::new(
        store.clone(),
        resolver.clone(),
        ResolutionConfig {
            top_k: 5,
            similarity_threshold: 0.9,
        },
    );

    engine
        .submit("demo", guideline("Retry flaky network calls with backoff"), true)
        .await
        .unwrap();
    assert_eq!(resolver.calls(), 0);
    assert_eq!(count(&store).await, 2);
}

#[tokio::test]
async fn test_supersede_replaces_target() {
    let (_dir, store) = filesystem_store().await;
    let old = store.add_entity("demo", guideline(KM)).await.unwrap();
    let engine = engine(&store, Arc::new(StaticResolver::new(ResolutionAction::Supersede)));

    let outcome = engine.submit("demo", guideline(KM), true).await.unwrap();
    let ResolutionOutcome::Superseded { entity, replaced_id } = outcome else {
        panic!("expected supersede, got {outcome:?}");
    };
    assert_eq!(replaced_id, old.id);
    assert_ne!(entity.id, old.id);
    assert!(store.get_entity("demo", &old.id).await.unwrap_err().is_not_found());
    assert_eq!(count(&store).await, 1);
}

#[tokio::test]
async fn test_merge_writes_synthesized_content() {
    let (_dir, store) = filesystem_store().await;
    let old = store.add_entity("demo", guideline(KM)).await.unwrap();
    let engine = engine(&store, Arc::new(StaticResolver::new(ResolutionAction::Merge)));

    let outcome = engine.submit("demo", guideline(KM), true).await.unwrap();
    let ResolutionOutcome::Merged { entity, replaced_id } = outcome else {
        panic!("expected merge, got {outcome:?}");
    };
    assert_eq!(replaced_id, old.id);
    assert_eq!(entity.content, format!("{KM} {KM}"));

    let remaining = store
        .list_entities("demo", &EntityQuery::of_kind(EntityKind::Guideline))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, entity.id);
}

#[tokio::test]
#[traced_test]
async fn test_unavailable_decision_engine_falls_back_to_insert() {
    let (_dir, store) = filesystem_store().await;
    store.add_entity("demo", guideline(KM)).await.unwrap();
    let resolver = Arc::new(UnavailableResolver::default());
    let engine = engine(&store, resolver.clone());

    let outcome = engine.submit("demo", guideline(KM), true).await.unwrap();
    assert_eq!(outcome.action(), ResolutionAction::Insert);
    assert_eq!(resolver.calls(), 1);
    assert_eq!(count(&store).await, 2);
    assert!(logs_contain("Decision engine failed, falling back to insert"));
}

#[tokio::test]
async fn test_malformed_verdicts_fall_back_to_insert() {
    let malformed = [
        Verdict::supersede("999"),
        Verdict {
            action: ResolutionAction::Merge,
            merged_content: None,
            target_id: Some("1".to_string()),
        },
    ];

    for verdict in malformed {
        let (_dir, store) = filesystem_store().await;
        store.add_entity("demo", guideline(KM)).await.unwrap();
        let engine = engine(&store, Arc::new(FixedVerdictResolver(verdict.clone())));

        let outcome = engine.submit("demo", guideline(KM), true).await.unwrap();
        assert_eq!(outcome.action(), ResolutionAction::Insert, "{verdict:?}");
        assert_eq!(count(&store).await, 2);
    }
}

#[tokio::test]
async fn test_invalid_candidate_and_missing_namespace_are_surfaced() {
    let (_dir, store) = filesystem_store().await;
    let engine = engine(&store, Arc::new(UnavailableResolver::default()));

    let err = engine
        .submit("demo", NewEntity::guideline("   ", GuidelinePayload::default()), false)
        .await
        .unwrap_err();
    assert!(err.is_caller_error());

    let err = engine.submit("missing", guideline(KM), true).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_llm_resolver_drives_engine() {
    let (_dir, store) = filesystem_store().await;
    let existing = store
        .add_entity(
            "demo",
            NewEntity::new("note", KM, Metadata::new()).unwrap(),
        )
        .await
        .unwrap();
    let llm = Arc::new(MockLlmService::with_default(
        json!({ "action": "discard", "target_id": existing.id }).to_string(),
    ));
    let resolver = Arc::new(LlmResolver::new(llm.clone(), &LlmConfig::default()));
    let engine = engine(&store, resolver);

    let candidate = NewEntity::new("note", KM, Metadata::new()).unwrap();
    let outcome = engine.submit("demo", candidate, true).await.unwrap();
    assert_eq!(outcome.action(), ResolutionAction::Discard);
    assert_eq!(llm.calls(), 1);
    assert_eq!(count(&store).await, 1);
}
