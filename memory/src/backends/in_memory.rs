use super::{
    BackendError, DeleteResult, HealthStatus, Payload, SearchQuery, SearchResult, UpsertResult,
    VectorBackend, VectorRecord, cosine_similarity,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

type Collection = HashMap<String, VectorRecord>;

/// Process-local vector engine using brute-force cosine similarity.
pub struct InMemoryVectorBackend {
    collections: RwLock<HashMap<String, Collection>>,
    embedding_dimension: usize,
}

impl InMemoryVectorBackend {
    pub fn new(embedding_dimension: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            embedding_dimension,
        }
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn health_check(&self) -> Result<HealthStatus, BackendError> {
        Ok(HealthStatus::healthy("in_memory"))
    }

    async fn create_collection(&self, namespace_id: &str) -> Result<(), BackendError> {
        self.collections
            .write()
            .await
            .entry(namespace_id.to_string())
            .or_default();
        Ok(())
    }

    async fn drop_collection(&self, namespace_id: &str) -> Result<(), BackendError> {
        self.collections.write().await.remove(namespace_id);
        Ok(())
    }

    async fn upsert(
        &self,
        namespace_id: &str,
        vectors: Vec<VectorRecord>,
    ) -> Result<UpsertResult, BackendError> {
        if let Some(bad) = vectors
            .iter()
            .find(|r| r.vector.len() != self.embedding_dimension)
        {
            return Err(BackendError::DimensionMismatch {
                expected: self.embedding_dimension,
                actual: bad.vector.len(),
            });
        }

        let count = vectors.len();
        let mut collections = self.collections.write().await;
        let collection = collections.entry(namespace_id.to_string()).or_default();
        for record in vectors {
            collection.insert(record.id.clone(), record);
        }
        Ok(UpsertResult::success(count))
    }

    async fn search(
        &self,
        namespace_id: &str,
        query: SearchQuery,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(namespace_id) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<SearchResult> = collection
            .values()
            .filter(|r| r.matches(&query.filters))
            .map(|r| SearchResult {
                id: r.id.clone(),
                score: cosine_similarity(&query.vector, &r.vector),
                payload: r.payload.clone(),
            })
            .filter(|r| query.score_threshold.is_none_or(|t| r.score >= t))
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        results.truncate(query.limit);
        Ok(results)
    }

    async fn delete(
        &self,
        namespace_id: &str,
        ids: Vec<String>,
    ) -> Result<DeleteResult, BackendError> {
        let mut collections = self.collections.write().await;
        let Some(collection) = collections.get_mut(namespace_id) else {
            return Ok(DeleteResult::new(0));
        };
        let deleted = ids
            .iter()
            .filter(|id| collection.remove(id.as_str()).is_some())
            .count();
        Ok(DeleteResult::new(deleted))
    }

    async fn get(
        &self,
        namespace_id: &str,
        id: &str,
    ) -> Result<Option<VectorRecord>, BackendError> {
        Ok(self
            .collections
            .read()
            .await
            .get(namespace_id)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn scroll(
        &self,
        namespace_id: &str,
        filters: &Payload,
    ) -> Result<Vec<VectorRecord>, BackendError> {
        Ok(self
            .collections
            .read()
            .await
            .get(namespace_id)
            .map(|c| c.values().filter(|r| r.matches(filters)).cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, namespace_id: &str) -> Result<usize, BackendError> {
        Ok(self
            .collections
            .read()
            .await
            .get(namespace_id)
            .map_or(0, HashMap::len))
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, vector: Vec<f32>, kind: &str) -> VectorRecord {
        VectorRecord::new(id, vector, HashMap::new()).with_payload("entity_type", json!(kind))
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let backend = InMemoryVectorBackend::new(2);
        backend
            .upsert(
                "demo",
                vec![
                    record("a", vec![1.0, 0.0], "guideline"),
                    record("b", vec![0.7, 0.7], "guideline"),
                    record("c", vec![0.0, 1.0], "policy"),
                ],
            )
            .await
            .unwrap();

        let results = backend
            .search("demo", SearchQuery::new(vec![1.0, 0.1]).with_limit(2))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");

        let filtered = backend
            .search(
                "demo",
                SearchQuery::new(vec![1.0, 0.0]).with_filter("entity_type", json!("policy")),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "c");
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let backend = InMemoryVectorBackend::new(1);
        backend
            .upsert("a", vec![record("1", vec![1.0], "note")])
            .await
            .unwrap();
        assert_eq!(backend.count("a").await.unwrap(), 1);
        assert_eq!(backend.count("b").await.unwrap(), 0);
        assert!(backend.get("b", "1").await.unwrap().is_none());

        backend.drop_collection("a").await.unwrap();
        assert_eq!(backend.count("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let backend = InMemoryVectorBackend::new(3);
        let err = backend
            .upsert("demo", vec![record("1", vec![1.0], "note")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }
}
