//! Behavioural contract every `EntityStore` must satisfy.
//!
//! Each check creates its own namespaces, so the suite can run against one
//! store instance. Search ranking is backend-specific; the checks only rely
//! on an exact-content query ranking its own entity among the hits.
//! Typed metadata never carries explicit nulls (`NewEntity::new` rejects
//! them), so fields read back exactly as written.

use errors::StoreError;
use mk_core::traits::{EntityStore, HealthStatus};
use mk_core::types::{EntityKind, EntityQuery, Metadata, NewEntity};
use serde_json::{Value, json};

fn metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

pub async fn run_all(store: &dyn EntityStore) {
    namespace_lifecycle(store).await;
    minted_and_invalid_namespace_ids(store).await;
    add_then_get_returns_input_fields(store).await;
    invalid_entities_are_rejected(store).await;
    delete_entity_is_single_shot(store).await;
    list_filters_by_kind_and_metadata(store).await;
    search_respects_limit_and_filters(store).await;
    namespaces_are_isolated(store).await;
    delete_namespace_cascades(store).await;
    demo_scenario(store).await;
}

pub async fn namespace_lifecycle(store: &dyn EntityStore) {
    assert_eq!(store.ready().await.status, HealthStatus::Healthy);

    let ns = store
        .create_namespace(Some("contract-lifecycle"))
        .await
        .expect("create namespace");
    assert_eq!(ns.id, "contract-lifecycle");

    let summary = store.get_namespace(&ns.id).await.expect("get namespace");
    assert_eq!(summary.entity_count, 0);

    let err = store.create_namespace(Some(&ns.id)).await.unwrap_err();
    assert_eq!(err, StoreError::already_exists(&ns.id));

    let listed = store.list_namespaces().await.expect("list namespaces");
    assert!(listed.iter().any(|s| s.id == ns.id));

    store.delete_namespace(&ns.id).await.expect("delete namespace");

    let listed = store.list_namespaces().await.expect("list namespaces");
    assert!(listed.iter().all(|s| s.id != ns.id));
    assert!(store.get_namespace(&ns.id).await.unwrap_err().is_not_found());
    assert!(store.delete_namespace(&ns.id).await.unwrap_err().is_not_found());
    assert!(
        store
            .list_entities(&ns.id, &EntityQuery::all())
            .await
            .unwrap_err()
            .is_not_found()
    );
}

pub async fn minted_and_invalid_namespace_ids(store: &dyn EntityStore) {
    let minted = store.create_namespace(None).await.expect("mint namespace");
    assert!(minted.id.starts_with("ns_"));
    store.delete_namespace(&minted.id).await.expect("delete minted");

    for bad in ["", "has space", "../escape", "a/b"] {
        let err = store.create_namespace(Some(bad)).await.unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidEntity { .. }),
            "expected InvalidEntity for {bad:?}, got {err:?}"
        );
    }
}

pub async fn add_then_get_returns_input_fields(store: &dyn EntityStore) {
    let ns = store
        .create_namespace(Some("contract-roundtrip"))
        .await
        .expect("create namespace");

    let inputs = vec![
        NewEntity::new(
            "guideline",
            "Check the unit system before converting distances",
            metadata(json!({
                "rationale": "Avoids wrong answers",
                "category": "strategy",
                "trigger": "distance questions",
                "source_trace_id": "t-1"
            })),
        ),
        NewEntity::new(
            "policy",
            "Ask before deleting files",
            metadata(json!({
                "name": "deletion guard",
                "policy_type": "tool_approval",
                "triggers": [{"type": "keyword", "value": ["rm", "delete"]}],
                "priority": 80
            })),
        ),
        NewEntity::new(
            "trajectory",
            "[{\"role\":\"user\",\"content\":\"hi\"}]",
            metadata(json!({"trace_id": "t-1", "span_id": "s-1", "model": "gpt-4o"})),
        ),
        NewEntity::new(
            "note",
            "Free-form note",
            metadata(json!({"tags": ["a", "b"], "nested": {"x": 1}})),
        ),
    ];

    for input in inputs {
        let input = input.expect("valid entity");
        let added = store
            .add_entity(&ns.id, input.clone())
            .await
            .expect("add entity");
        assert!(!added.id.is_empty());
        assert_eq!(added.namespace_id, ns.id);
        assert!(added.same_fields_as(&input));

        let fetched = store
            .get_entity(&ns.id, &added.id)
            .await
            .expect("get entity");
        assert!(fetched.same_fields_as(&input));
        assert_eq!(fetched.metadata(), input.metadata());
        assert_eq!(fetched.id, added.id);
        assert_eq!(
            fetched.created_at.timestamp_millis(),
            added.created_at.timestamp_millis()
        );
    }

    let summary = store.get_namespace(&ns.id).await.expect("get namespace");
    assert_eq!(summary.entity_count, 4);

    store.delete_namespace(&ns.id).await.expect("cleanup");
}

pub async fn invalid_entities_are_rejected(store: &dyn EntityStore) {
    let ns = store
        .create_namespace(Some("contract-invalid"))
        .await
        .expect("create namespace");

    let mut blank = NewEntity::new("note", "x", Metadata::new()).expect("valid entity");
    blank.content = "   ".to_string();
    let err = store.add_entity(&ns.id, blank).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidEntity { .. }));

    let mut mismatched = NewEntity::new("note", "x", Metadata::new()).expect("valid entity");
    mismatched.kind = EntityKind::Guideline;
    let err = store.add_entity(&ns.id, mismatched).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidEntity { .. }));

    let err = store
        .add_entity(
            "contract-missing",
            NewEntity::new("note", "x", Metadata::new()).expect("valid entity"),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(
        store
            .get_namespace(&ns.id)
            .await
            .expect("get namespace")
            .entity_count,
        0
    );
    store.delete_namespace(&ns.id).await.expect("cleanup");
}

pub async fn delete_entity_is_single_shot(store: &dyn EntityStore) {
    let ns = store
        .create_namespace(Some("contract-delete"))
        .await
        .expect("create namespace");
    let added = store
        .add_entity(
            &ns.id,
            NewEntity::new("note", "short-lived", Metadata::new()).expect("valid entity"),
        )
        .await
        .expect("add entity");

    store
        .delete_entity(&ns.id, &added.id)
        .await
        .expect("first delete");
    assert!(
        store
            .delete_entity(&ns.id, &added.id)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        store
            .get_entity(&ns.id, &added.id)
            .await
            .unwrap_err()
            .is_not_found()
    );

    store.delete_namespace(&ns.id).await.expect("cleanup");
}

pub async fn list_filters_by_kind_and_metadata(store: &dyn EntityStore) {
    let ns = store
        .create_namespace(Some("contract-list"))
        .await
        .expect("create namespace");

    for (kind, content, meta) in [
        ("guideline", "guideline one", json!({"trigger": "one"})),
        ("guideline", "guideline two", json!({"trigger": "two"})),
        ("trajectory", "[]", json!({"trace_id": "t-9", "span_id": "abc"})),
    ] {
        store
            .add_entity(
                &ns.id,
                NewEntity::new(kind, content, metadata(meta)).expect("valid entity"),
            )
            .await
            .expect("add entity");
    }

    let all = store
        .list_entities(&ns.id, &EntityQuery::all())
        .await
        .expect("list all");
    assert_eq!(all.len(), 3);

    let guidelines = store
        .list_entities(&ns.id, &EntityQuery::of_kind("guideline"))
        .await
        .expect("list guidelines");
    assert_eq!(guidelines.len(), 2);
    assert!(guidelines.iter().all(|e| e.kind == EntityKind::Guideline));

    let by_span = store
        .list_entities(
            &ns.id,
            &EntityQuery::of_kind("trajectory").with_filter("span_id", "abc"),
        )
        .await
        .expect("list by span");
    assert_eq!(by_span.len(), 1);

    let none = store
        .list_entities(&ns.id, &EntityQuery::all().with_filter("trigger", "three"))
        .await
        .expect("list none");
    assert!(none.is_empty());

    store.delete_namespace(&ns.id).await.expect("cleanup");
}

pub async fn search_respects_limit_and_filters(store: &dyn EntityStore) {
    let ns = store
        .create_namespace(Some("contract-search"))
        .await
        .expect("create namespace");

    let empty = store
        .search_entities(&ns.id, "anything", &EntityQuery::all(), 5)
        .await
        .expect("search empty namespace");
    assert!(empty.is_empty());

    for i in 0..6 {
        store
            .add_entity(
                &ns.id,
                NewEntity::new("note", format!("shared topic entry {i}"), Metadata::new())
                    .expect("valid entity"),
            )
            .await
            .expect("add entity");
    }
    store
        .add_entity(
            &ns.id,
            NewEntity::new("guideline", "shared topic guideline", Metadata::new())
                .expect("valid entity"),
        )
        .await
        .expect("add entity");

    let hits = store
        .search_entities(&ns.id, "shared topic", &EntityQuery::all(), 3)
        .await
        .expect("search");
    assert!(hits.len() <= 3);
    assert!(!hits.is_empty());
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let zero = store
        .search_entities(&ns.id, "shared topic", &EntityQuery::all(), 0)
        .await
        .expect("search with zero limit");
    assert!(zero.is_empty());

    let only_guidelines = store
        .search_entities(&ns.id, "shared topic", &EntityQuery::of_kind("guideline"), 10)
        .await
        .expect("search guidelines");
    assert_eq!(only_guidelines.len(), 1);
    assert_eq!(only_guidelines[0].entity.content, "shared topic guideline");

    let exact = store
        .search_entities(&ns.id, "shared topic entry 4", &EntityQuery::all(), 7)
        .await
        .expect("search exact");
    assert!(
        exact
            .iter()
            .any(|h| h.entity.content == "shared topic entry 4")
    );

    assert!(
        store
            .search_entities("contract-search-missing", "x", &EntityQuery::all(), 5)
            .await
            .unwrap_err()
            .is_not_found()
    );

    store.delete_namespace(&ns.id).await.expect("cleanup");
}

pub async fn namespaces_are_isolated(store: &dyn EntityStore) {
    let a = store
        .create_namespace(Some("contract-iso-a"))
        .await
        .expect("create a");
    let b = store
        .create_namespace(Some("contract-iso-b"))
        .await
        .expect("create b");

    let added = store
        .add_entity(
            &a.id,
            NewEntity::new("note", "only in a", Metadata::new()).expect("valid entity"),
        )
        .await
        .expect("add entity");

    assert!(
        store
            .get_entity(&b.id, &added.id)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        store
            .list_entities(&b.id, &EntityQuery::all())
            .await
            .expect("list b")
            .is_empty()
    );
    assert!(
        store
            .search_entities(&b.id, "only in a", &EntityQuery::all(), 5)
            .await
            .expect("search b")
            .is_empty()
    );

    store.delete_namespace(&a.id).await.expect("cleanup a");
    store.delete_namespace(&b.id).await.expect("cleanup b");
}

pub async fn delete_namespace_cascades(store: &dyn EntityStore) {
    let ns = store
        .create_namespace(Some("contract-cascade"))
        .await
        .expect("create namespace");
    let added = store
        .add_entity(
            &ns.id,
            NewEntity::new("note", "will vanish", Metadata::new()).expect("valid entity"),
        )
        .await
        .expect("add entity");

    store.delete_namespace(&ns.id).await.expect("delete namespace");
    assert!(
        store
            .get_entity(&ns.id, &added.id)
            .await
            .unwrap_err()
            .is_not_found()
    );

    store
        .create_namespace(Some(&ns.id))
        .await
        .expect("recreate namespace");
    assert_eq!(
        store
            .get_namespace(&ns.id)
            .await
            .expect("get namespace")
            .entity_count,
        0
    );
    store.delete_namespace(&ns.id).await.expect("cleanup");
}

pub async fn demo_scenario(store: &dyn EntityStore) {
    store
        .create_namespace(Some("demo"))
        .await
        .expect("create demo");
    store
        .add_entity(
            "demo",
            NewEntity::new(
                "guideline",
                "Use km for Canada distances",
                metadata(json!({"trigger": "Canada distances"})),
            )
            .expect("valid entity"),
        )
        .await
        .expect("add guideline");

    let entities = store
        .list_entities("demo", &EntityQuery::all())
        .await
        .expect("list demo");
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].content, "Use km for Canada distances");
    assert_eq!(
        entities[0].metadata().get("trigger"),
        Some(&json!("Canada distances"))
    );

    store.delete_namespace("demo").await.expect("cleanup");
}
