use config::ConsolidationConfig;
use knowledge::{CallPolicy, Consolidator};
use memory::embedding::MockEmbeddingService;
use memory::llm::MockLlmService;
use mk_core::traits::SharedStore;
use mk_core::types::{EntityKind, EntityQuery, GuidelinePayload, NewEntity};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use storage::FileEntityStore;
use tempfile::TempDir;

fn guideline(content: &str, task: Option<&str>) -> NewEntity {
    let mut payload = GuidelinePayload::default();
    if let Some(task) = task {
        payload = payload.with_extra("task_description", task);
    }
    NewEntity::guideline(content, payload)
}

async fn seeded_store() -> (TempDir, SharedStore, Vec<String>) {
    let dir = TempDir::new().unwrap();
    let store: SharedStore = Arc::new(FileEntityStore::open(dir.path()).unwrap());
    store.create_namespace(Some("demo")).await.unwrap();

    let mut ids = Vec::new();
    for (content, task) in [
        ("Check visa rules early", Some("Plan a trip to Japan")),
        ("Book rail passes before departure", Some("plan a trip to Japan")),
        ("Use km for distances", Some("Convert distances in Canada")),
        ("Keep receipts", None),
    ] {
        let entity = store.add_entity("demo", guideline(content, task)).await.unwrap();
        ids.push(entity.id);
    }
    (dir, store, ids)
}

fn consolidator(store: &SharedStore, llm: Arc<MockLlmService>) -> Consolidator {
    Consolidator::new(
        store.clone(),
        Arc::new(MockEmbeddingService::new(256)),
        llm,
        CallPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 1,
        },
        ConsolidationConfig::default(),
    )
}

#[tokio::test]
async fn test_similar_task_guidelines_are_combined() {
    let (_dir, store, ids) = seeded_store().await;
    let llm = Arc::new(MockLlmService::with_default(
        json!({
            "task_description": "Plan a trip to Japan",
            "guidelines": [{
                "content": "Sort out visas and rail passes before departure",
                "rationale": "both take time",
                "category": "strategy",
                "trigger": "international travel"
            }]
        })
        .to_string(),
    ));

    let report = consolidator(&store, llm.clone()).run("demo").await.unwrap();
    assert_eq!(report.clusters_found, 1);
    assert_eq!(report.clusters_consolidated, 1);
    assert_eq!(report.guidelines_removed, 2);
    assert_eq!(report.guidelines_added, 1);
    assert!(report.failures.is_empty());
    assert_eq!(llm.calls(), 1);

    let remaining = store
        .list_entities("demo", &EntityQuery::of_kind(EntityKind::Guideline))
        .await
        .unwrap();
    let contents: Vec<_> = remaining.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "Use km for distances",
            "Keep receipts",
            "Sort out visas and rail passes before departure"
        ]
    );

    let combined = remaining[2].as_guideline().unwrap();
    assert_eq!(combined.task_description(), Some("Plan a trip to Japan"));
    assert_eq!(combined.extra["creation_mode"], "consolidated");
    assert_eq!(combined.extra["consolidated_from"], json!([ids[0], ids[1]]));
}

#[tokio::test]
async fn test_failed_cluster_is_left_untouched() {
    let (_dir, store, ids) = seeded_store().await;
    let llm = Arc::new(MockLlmService::new().failing_first(5));

    let report = consolidator(&store, llm).run("demo").await.unwrap();
    assert_eq!(report.clusters_found, 1);
    assert_eq!(report.clusters_consolidated, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entity_ids, vec![ids[0].clone(), ids[1].clone()]);
    assert_eq!(store.get_namespace("demo").await.unwrap().entity_count, 4);
}

#[tokio::test]
async fn test_nothing_to_cluster() {
    let dir = TempDir::new().unwrap();
    let store: SharedStore = Arc::new(FileEntityStore::open(dir.path()).unwrap());
    store.create_namespace(Some("demo")).await.unwrap();
    store
        .add_entity("demo", guideline("Alone", Some("Solo task")))
        .await
        .unwrap();
    let llm = Arc::new(MockLlmService::new());

    let report = consolidator(&store, llm.clone()).run("demo").await.unwrap();
    assert_eq!(report, Default::default());
    assert_eq!(llm.calls(), 0);
}
