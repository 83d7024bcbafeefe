use config::{ResolutionConfig, SyncConfig};
use knowledge::ConflictResolutionEngine;
use mk_core::traits::SharedStore;
use mk_core::types::{EntityKind, EntityQuery, ResolutionAction};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use storage::FileEntityStore;
use sync::{
    HttpTraceSource, InMemoryStatePersister, SyncError, SyncPipeline, SyncRequest, TraceSource,
    TraceSourceError,
};
use tempfile::TempDir;
use testing::{ScriptedGenerator, StaticResolver};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn span(span_id: &str) -> serde_json::Value {
    json!({
        "name": "litellm_request",
        "context": {"trace_id": "trace-1", "span_id": span_id},
        "start_time": "2025-01-01T00:00:00Z",
        "attributes": {
            "gen_ai.prompt.0.role": "user",
            "gen_ai.prompt.0.content": format!("question for {span_id}"),
            "gen_ai.completion.0.role": "assistant",
            "gen_ai.completion.0.content": "[{'type': 'text', 'text': 'answer'}]",
        }
    })
}

async fn paginated_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/demo/spans"))
        .and(query_param("cursor", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [span("s3")],
            "next_cursor": null
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/demo/spans"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [span("s1"), span("s2")],
            "next_cursor": "page-2"
        })))
        .mount(&server)
        .await;
    server
}

fn source(server: &MockServer) -> HttpTraceSource {
    HttpTraceSource::new(server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_page_follows_cursor() {
    let server = paginated_server().await;
    let source = source(&server);

    let first = source.fetch_page("demo", 2, None).await.unwrap();
    assert_eq!(first.spans.len(), 2);
    assert_eq!(first.next_cursor.as_deref(), Some("page-2"));
    assert_eq!(first.spans[0].span_id.as_deref(), Some("s1"));

    let second = source.fetch_page("demo", 2, Some("page-2")).await.unwrap();
    assert_eq!(second.spans.len(), 1);
    assert_eq!(second.next_cursor, None);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.query(), Some("limit=2"));
    assert_eq!(requests[1].url.query(), Some("limit=2&cursor=page-2"));
}

#[tokio::test]
async fn test_server_error_is_reported_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = source(&server).fetch_page("demo", 10, None).await.unwrap_err();
    assert_eq!(
        err,
        TraceSourceError::Status {
            status: 503,
            body: "maintenance".to_string()
        }
    );
}

#[tokio::test]
async fn test_body_without_data_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"spans": []})))
        .mount(&server)
        .await;

    let err = source(&server).fetch_page("demo", 10, None).await.unwrap_err();
    assert!(matches!(err, TraceSourceError::Decode { .. }));
}

#[tokio::test]
async fn test_unreachable_host_is_a_request_error() {
    let source = HttpTraceSource::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let err = source.fetch_page("demo", 10, None).await.unwrap_err();
    assert!(matches!(err, TraceSourceError::Request { .. }));
}

async fn pipeline(server: &MockServer, dir: &TempDir) -> (SharedStore, SyncPipeline) {
    let store: SharedStore = Arc::new(FileEntityStore::open(dir.path()).unwrap());
    let engine = Arc::new(ConflictResolutionEngine::new(
        store.clone(),
        Arc::new(StaticResolver::new(ResolutionAction::Discard)),
        ResolutionConfig::default(),
    ));
    let config = SyncConfig {
        trace_source_url: server.uri(),
        project: "demo".to_string(),
        namespace_id: "demo".to_string(),
        page_size: 2,
        ..SyncConfig::default()
    };
    let pipeline = SyncPipeline::new(
        Arc::new(HttpTraceSource::from_config(&config).unwrap()),
        engine,
        Arc::new(ScriptedGenerator::empty()),
        Arc::new(InMemoryStatePersister::new()),
        &config,
    );
    (store, pipeline)
}

#[tokio::test]
async fn test_pipeline_reads_every_page() {
    let server = paginated_server().await;
    let dir = TempDir::new().unwrap();
    let (store, pipeline) = pipeline(&server, &dir).await;
    let request = SyncRequest {
        namespace_id: "demo".to_string(),
        project: "demo".to_string(),
        page_size: 2,
        max_spans: 100,
        include_errors: false,
    };

    let report = pipeline.sync(&request).await.unwrap();
    assert_eq!(report.fetched, 3);
    assert_eq!(report.processed, 3);

    let trajectories = store
        .list_entities("demo", &EntityQuery::of_kind(EntityKind::Trajectory))
        .await
        .unwrap();
    assert_eq!(trajectories.len(), 3);
    let messages: Vec<mk_core::messages::Message> =
        serde_json::from_str(&trajectories[0].content).unwrap();
    assert_eq!(messages[1].content, "answer");
}

#[tokio::test]
async fn test_pipeline_aborts_when_source_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let (_store, pipeline) = pipeline(&server, &dir).await;
    let request = SyncRequest {
        namespace_id: "demo".to_string(),
        project: "demo".to_string(),
        page_size: 2,
        max_spans: 100,
        include_errors: false,
    };

    let err = pipeline.sync(&request).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Upstream(TraceSourceError::Status { status: 500, .. })
    ));
}
