//! Indexed entity store: entities are embedded at write time and stored in a
//! vector engine, one collection per namespace. Namespace existence and
//! creation time live in the SQLite registry.

use crate::backends::{Payload, SearchQuery, VectorBackend, VectorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errors::{StoreError, StoreResult};
use mk_core::traits::{EntityStore, HealthStatus, SharedEmbedder};
use mk_core::types::{
    Entity, EntityKind, EntityPayload, EntityQuery, Metadata, Namespace, NamespaceSummary,
    NewEntity, SearchHit, StoreHealth, resolve_namespace_id,
};
use serde_json::{Value, json};
use std::sync::Arc;
use storage::NamespaceRegistry;
use tracing::{debug, info, instrument, warn};

const BACKEND: &str = "indexed";

const FIELD_TYPE: &str = "entity_type";
const FIELD_CONTENT: &str = "content";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_METADATA: &str = "metadata";

pub struct IndexedEntityStore {
    registry: NamespaceRegistry,
    vectors: Arc<dyn VectorBackend>,
    embedder: SharedEmbedder,
}

impl IndexedEntityStore {
    pub fn new(
        registry: NamespaceRegistry,
        vectors: Arc<dyn VectorBackend>,
        embedder: SharedEmbedder,
    ) -> Self {
        Self {
            registry,
            vectors,
            embedder,
        }
    }

    async fn require_namespace(&self, namespace_id: &str) -> StoreResult<Namespace> {
        self.registry
            .get(namespace_id)
            .await?
            .ok_or_else(|| StoreError::namespace_not_found(namespace_id))
    }

    async fn summary(&self, namespace: Namespace) -> StoreResult<NamespaceSummary> {
        let entity_count = self.vectors.count(&namespace.id).await?;
        Ok(NamespaceSummary {
            id: namespace.id,
            created_at: namespace.created_at,
            entity_count,
        })
    }

    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        let vector = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| StoreError::collaborator("embedding", e))?;

        let expected = self.embedder.dimension();
        if vector.len() != expected {
            return Err(StoreError::collaborator(
                "embedding",
                format!("expected {expected} dimensions, got {}", vector.len()),
            ));
        }
        Ok(vector)
    }

    fn pushdown_filters(query: &EntityQuery) -> Payload {
        let mut filters = Payload::new();
        if let Some(kind) = &query.kind {
            filters.insert(FIELD_TYPE.to_string(), json!(kind.as_str()));
        }
        for (key, value) in &query.filters {
            filters.insert(format!("{FIELD_METADATA}.{key}"), value.clone());
        }
        filters
    }
}

fn record_payload(entity: &NewEntity, created_at: DateTime<Utc>) -> Payload {
    let mut payload = Payload::new();
    payload.insert(FIELD_TYPE.to_string(), json!(entity.kind.as_str()));
    payload.insert(FIELD_CONTENT.to_string(), json!(entity.content));
    payload.insert(FIELD_CREATED_AT.to_string(), json!(created_at.to_rfc3339()));
    payload.insert(
        FIELD_METADATA.to_string(),
        Value::Object(entity.metadata()),
    );
    payload
}

fn payload_to_entity(namespace_id: &str, id: String, payload: &Payload) -> StoreResult<Entity> {
    let corrupt = |field: &str| {
        StoreError::backend(
            BACKEND,
            format!("record {namespace_id}/{id} has no valid `{field}`"),
        )
    };

    let kind = payload
        .get(FIELD_TYPE)
        .and_then(Value::as_str)
        .map(EntityKind::from)
        .ok_or_else(|| corrupt(FIELD_TYPE))?;
    let content = payload
        .get(FIELD_CONTENT)
        .and_then(Value::as_str)
        .ok_or_else(|| corrupt(FIELD_CONTENT))?
        .to_string();
    let created_at = payload
        .get(FIELD_CREATED_AT)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .ok_or_else(|| corrupt(FIELD_CREATED_AT))?
        .with_timezone(&Utc);
    let metadata: Metadata = match payload.get(FIELD_METADATA) {
        Some(Value::Object(map)) => map.clone(),
        _ => Metadata::new(),
    };

    let payload = EntityPayload::from_metadata(&kind, metadata.clone()).unwrap_or_else(|e| {
        warn!(
            namespace = %namespace_id,
            entity = %id,
            error = %e,
            "Stored metadata does not match its type"
        );
        EntityPayload::Opaque(metadata)
    });

    Ok(Entity {
        id,
        namespace_id: namespace_id.to_string(),
        kind,
        content,
        payload,
        created_at,
    })
}

#[async_trait]
impl EntityStore for IndexedEntityStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn ready(&self) -> StoreHealth {
        if let Err(e) = self.registry.ping().await {
            return StoreHealth {
                backend: BACKEND.to_string(),
                status: HealthStatus::Unhealthy,
                detail: Some(e.to_string()),
            };
        }
        match self.vectors.health_check().await {
            Ok(health) if health.healthy => StoreHealth {
                backend: BACKEND.to_string(),
                status: HealthStatus::Healthy,
                detail: health.latency_ms.map(|ms| format!("{} latency {ms}ms", health.backend)),
            },
            Ok(health) => StoreHealth {
                backend: BACKEND.to_string(),
                status: HealthStatus::Degraded,
                detail: health.message,
            },
            Err(e) => StoreHealth {
                backend: BACKEND.to_string(),
                status: HealthStatus::Unhealthy,
                detail: Some(e.to_string()),
            },
        }
    }

    #[instrument(skip(self))]
    async fn create_namespace(&self, id: Option<&str>) -> StoreResult<Namespace> {
        let id = resolve_namespace_id(id)?;
        let namespace = self.registry.insert(&id).await?;

        if let Err(e) = self.vectors.create_collection(&id).await {
            if let Err(rollback) = self.registry.remove(&id).await {
                warn!(
                    namespace = %id,
                    error = %rollback,
                    "Failed to roll back namespace registration"
                );
            }
            return Err(e.into());
        }

        info!(namespace = %id, "Created namespace");
        Ok(namespace)
    }

    async fn get_namespace(&self, id: &str) -> StoreResult<NamespaceSummary> {
        let namespace = self.require_namespace(id).await?;
        self.summary(namespace).await
    }

    /// Drops the collection before the registry row so a failure leaves the
    /// namespace visible and retryable rather than half-deleted.
    #[instrument(skip(self))]
    async fn delete_namespace(&self, id: &str) -> StoreResult<()> {
        self.require_namespace(id).await?;
        self.vectors.drop_collection(id).await?;
        self.registry.remove(id).await?;
        info!(namespace = %id, "Deleted namespace");
        Ok(())
    }

    async fn list_namespaces(&self) -> StoreResult<Vec<NamespaceSummary>> {
        let mut summaries = Vec::new();
        for namespace in self.registry.list().await? {
            summaries.push(self.summary(namespace).await?);
        }
        Ok(summaries)
    }

    #[instrument(skip(self, entity), fields(kind = %entity.kind))]
    async fn add_entity(&self, namespace_id: &str, entity: NewEntity) -> StoreResult<Entity> {
        entity.validate()?;
        self.require_namespace(namespace_id).await?;

        let vector = self.embed(&entity.content).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let record = VectorRecord::new(id.clone(), vector, record_payload(&entity, created_at));
        self.vectors.upsert(namespace_id, vec![record]).await?;

        debug!(namespace = %namespace_id, entity = %id, "Added entity");
        Ok(Entity {
            id,
            namespace_id: namespace_id.to_string(),
            kind: entity.kind,
            content: entity.content,
            payload: entity.payload,
            created_at,
        })
    }

    async fn get_entity(&self, namespace_id: &str, entity_id: &str) -> StoreResult<Entity> {
        self.require_namespace(namespace_id).await?;
        if uuid::Uuid::parse_str(entity_id).is_err() {
            return Err(StoreError::entity_not_found(namespace_id, entity_id));
        }
        let record = self
            .vectors
            .get(namespace_id, entity_id)
            .await?
            .ok_or_else(|| StoreError::entity_not_found(namespace_id, entity_id))?;
        payload_to_entity(namespace_id, record.id, &record.payload)
    }

    #[instrument(skip(self))]
    async fn delete_entity(&self, namespace_id: &str, entity_id: &str) -> StoreResult<()> {
        self.get_entity(namespace_id, entity_id).await?;
        self.vectors
            .delete(namespace_id, vec![entity_id.to_string()])
            .await?;
        debug!(namespace = %namespace_id, entity = %entity_id, "Deleted entity");
        Ok(())
    }

    async fn list_entities(
        &self,
        namespace_id: &str,
        query: &EntityQuery,
    ) -> StoreResult<Vec<Entity>> {
        self.require_namespace(namespace_id).await?;
        let records = self
            .vectors
            .scroll(namespace_id, &Self::pushdown_filters(query))
            .await?;

        let mut entities = records
            .into_iter()
            .map(|r| payload_to_entity(namespace_id, r.id, &r.payload))
            .collect::<StoreResult<Vec<_>>>()?;
        entities.retain(|e| query.matches(e));
        entities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entities)
    }

    /// Ranked by cosine similarity of embeddings; scores are in [-1, 1].
    async fn search_entities(
        &self,
        namespace_id: &str,
        text: &str,
        query: &EntityQuery,
        limit: usize,
    ) -> StoreResult<Vec<SearchHit>> {
        self.require_namespace(namespace_id).await?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embed(text).await?;
        let results = self
            .vectors
            .search(
                namespace_id,
                SearchQuery::new(vector)
                    .with_limit(limit)
                    .with_filters(Self::pushdown_filters(query)),
            )
            .await?;

        let mut hits = Vec::with_capacity(results.len());
        for result in results {
            let entity = payload_to_entity(namespace_id, result.id, &result.payload)?;
            if query.matches(&entity) {
                hits.push(SearchHit {
                    entity,
                    score: result.score,
                });
            }
        }
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryVectorBackend;
    use crate::embedding::MockEmbeddingService;

    async fn store() -> IndexedEntityStore {
        IndexedEntityStore::new(
            NamespaceRegistry::in_memory().await.unwrap(),
            Arc::new(InMemoryVectorBackend::new(64)),
            Arc::new(MockEmbeddingService::new(64)),
        )
    }

    fn guideline(content: &str) -> NewEntity {
        NewEntity::new("guideline", content, Metadata::new()).unwrap()
    }

    #[tokio::test]
    async fn test_search_prefers_semantically_close_content() {
        let store = store().await;
        store.create_namespace(Some("demo")).await.unwrap();
        store
            .add_entity("demo", guideline("Use km for Canada distances"))
            .await
            .unwrap();
        store
            .add_entity("demo", guideline("Retry flaky network calls with backoff"))
            .await
            .unwrap();

        let hits = store
            .search_entities("demo", "Canada distances in km", &EntityQuery::all(), 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entity.content, "Use km for Canada distances");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_unknown_entity_id_is_not_found() {
        let store = store().await;
        store.create_namespace(Some("demo")).await.unwrap();
        let err = store.get_entity("demo", "42").await.unwrap_err();
        assert!(err.is_not_found());
        let err = store
            .get_entity("demo", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_namespace_counts_follow_writes() {
        let store = store().await;
        store.create_namespace(Some("demo")).await.unwrap();
        let e = store.add_entity("demo", guideline("a")).await.unwrap();
        store.add_entity("demo", guideline("b")).await.unwrap();
        assert_eq!(store.get_namespace("demo").await.unwrap().entity_count, 2);

        store.delete_entity("demo", &e.id).await.unwrap();
        assert_eq!(store.get_namespace("demo").await.unwrap().entity_count, 1);
    }

    #[tokio::test]
    async fn test_ready_reports_healthy() {
        let store = store().await;
        let health = store.ready().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.backend, "indexed");
    }
}
