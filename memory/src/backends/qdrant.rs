use super::{
    BackendError, DeleteResult, HealthStatus, Payload, SearchQuery, SearchResult, UpsertResult,
    VectorBackend, VectorRecord,
};
use async_trait::async_trait;
use qdrant_client::{
    Qdrant,
    qdrant::{
        Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
        Filter, GetPointsBuilder, PointId, PointStruct, ScrollPointsBuilder, SearchPointsBuilder,
        UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder, VectorsOutput,
        point_id::PointIdOptions, vector_output::Vector,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const SCROLL_PAGE: u32 = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection_prefix: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection_prefix: "mk".to_string(),
        }
    }
}

/// Qdrant engine with one collection per namespace.
pub struct QdrantBackend {
    client: Arc<Qdrant>,
    config: QdrantConfig,
    embedding_dimension: usize,
}

impl QdrantBackend {
    pub fn new(config: QdrantConfig, embedding_dimension: usize) -> Result<Self, BackendError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| BackendError::Connection {
                endpoint: config.url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client: Arc::new(client),
            config,
            embedding_dimension,
        })
    }

    fn collection_name(&self, namespace_id: &str) -> String {
        format!("{}_{}", self.config.collection_prefix, namespace_id)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, BackendError> {
        self.client
            .collection_exists(name)
            .await
            .map_err(|e| BackendError::Unavailable {
                reason: e.to_string(),
            })
    }

    fn record_to_point(&self, record: &VectorRecord) -> Result<PointStruct, BackendError> {
        let payload = qdrant_client::Payload::try_from(Value::Object(
            record.payload.clone().into_iter().collect(),
        ))
        .map_err(|e| BackendError::Payload {
            reason: e.to_string(),
        })?;

        Ok(PointStruct::new(
            PointId::from(record.id.clone()),
            record.vector.clone(),
            payload,
        ))
    }

    fn point_to_record(
        id: PointId,
        payload: HashMap<String, QdrantValue>,
        vectors: Option<VectorsOutput>,
    ) -> VectorRecord {
        let id = match id.point_id_options {
            Some(PointIdOptions::Uuid(u)) => u,
            Some(PointIdOptions::Num(n)) => n.to_string(),
            None => String::new(),
        };

        let payload: Payload = payload
            .into_iter()
            .map(|(key, value)| (key, value.into()))
            .collect();

        let vector = vectors
            .and_then(|v| v.get_vector())
            .and_then(|vec| match vec {
                Vector::Dense(dense) => Some(dense.data),
                _ => None,
            })
            .unwrap_or_default();

        VectorRecord {
            id,
            vector,
            payload,
        }
    }

    /// Pushes down the filters Qdrant can match exactly. Callers re-check
    /// every filter on the returned records.
    fn filter_for(filters: &Payload) -> Option<Filter> {
        let conditions: Vec<Condition> = filters
            .iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some(Condition::matches(key.as_str(), s.clone())),
                Value::Bool(b) => Some(Condition::matches(key.as_str(), *b)),
                Value::Number(n) => n.as_i64().map(|i| Condition::matches(key.as_str(), i)),
                _ => None,
            })
            .collect();

        if conditions.is_empty() {
            None
        } else {
            Some(Filter::must(conditions))
        }
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn health_check(&self) -> Result<HealthStatus, BackendError> {
        let start = Instant::now();

        match self.client.list_collections().await {
            Ok(_) => {
                let latency = start.elapsed().as_millis() as u64;
                Ok(HealthStatus::healthy("qdrant").with_latency(latency))
            }
            Err(e) => Ok(HealthStatus::unhealthy("qdrant", e.to_string())),
        }
    }

    async fn create_collection(&self, namespace_id: &str) -> Result<(), BackendError> {
        let name = self.collection_name(namespace_id);
        if self.collection_exists(&name).await? {
            return Ok(());
        }

        let request = CreateCollectionBuilder::new(&name).vectors_config(VectorParamsBuilder::new(
            self.embedding_dimension as u64,
            Distance::Cosine,
        ));
        self.client
            .create_collection(request)
            .await
            .map_err(|e| BackendError::operation("create_collection", e))?;

        debug!(collection = %name, "Created collection");
        Ok(())
    }

    async fn drop_collection(&self, namespace_id: &str) -> Result<(), BackendError> {
        let name = self.collection_name(namespace_id);
        if !self.collection_exists(&name).await? {
            return Ok(());
        }
        self.client
            .delete_collection(&name)
            .await
            .map_err(|e| BackendError::operation("drop_collection", e))?;
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
        self.create_collection(namespace_id).await?;

        let points = vectors
            .iter()
            .map(|r| self.record_to_point(r))
            .collect::<Result<Vec<_>, _>>()?;
        let count = points.len();

        self.client
            .upsert_points(
                UpsertPointsBuilder::new(self.collection_name(namespace_id), points).wait(true),
            )
            .await
            .map_err(|e| BackendError::operation("upsert", e))?;

        Ok(UpsertResult::success(count))
    }

    async fn search(
        &self,
        namespace_id: &str,
        query: SearchQuery,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let name = self.collection_name(namespace_id);
        if query.limit == 0 || !self.collection_exists(&name).await? {
            return Ok(Vec::new());
        }

        let mut request = SearchPointsBuilder::new(&name, query.vector.clone(), query.limit as u64)
            .with_payload(true);

        if let Some(filter) = Self::filter_for(&query.filters) {
            request = request.filter(filter);
        }

        if let Some(threshold) = query.score_threshold {
            request = request.score_threshold(threshold);
        }

        let result = self
            .client
            .search_points(request)
            .await
            .map_err(|e| BackendError::operation("search", e))?;

        Ok(result
            .result
            .into_iter()
            .filter_map(|p| {
                let id = p.id.clone()?;
                let record = Self::point_to_record(id, p.payload, None);
                Some(SearchResult {
                    id: record.id,
                    score: p.score,
                    payload: record.payload,
                })
            })
            .collect())
    }

    async fn delete(
        &self,
        namespace_id: &str,
        ids: Vec<String>,
    ) -> Result<DeleteResult, BackendError> {
        let name = self.collection_name(namespace_id);
        if ids.is_empty() || !self.collection_exists(&name).await? {
            return Ok(DeleteResult::new(0));
        }

        let point_ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
        let count = point_ids.len();

        self.client
            .delete_points(DeletePointsBuilder::new(&name).points(point_ids).wait(true))
            .await
            .map_err(|e| BackendError::operation("delete", e))?;

        Ok(DeleteResult::new(count))
    }

    async fn get(
        &self,
        namespace_id: &str,
        id: &str,
    ) -> Result<Option<VectorRecord>, BackendError> {
        let name = self.collection_name(namespace_id);
        if !self.collection_exists(&name).await? {
            return Ok(None);
        }

        let request = GetPointsBuilder::new(&name, vec![PointId::from(id.to_string())])
            .with_payload(true)
            .with_vectors(true);

        let result = self
            .client
            .get_points(request)
            .await
            .map_err(|e| BackendError::operation("get", e))?;

        Ok(result.result.into_iter().next().and_then(|p| {
            let id = p.id?;
            Some(Self::point_to_record(id, p.payload, p.vectors))
        }))
    }

    async fn scroll(
        &self,
        namespace_id: &str,
        filters: &Payload,
    ) -> Result<Vec<VectorRecord>, BackendError> {
        let name = self.collection_name(namespace_id);
        if !self.collection_exists(&name).await? {
            return Ok(Vec::new());
        }

        let filter = Self::filter_for(filters);
        let mut records = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut request = ScrollPointsBuilder::new(&name)
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(ref f) = filter {
                request = request.filter(f.clone());
            }
            if let Some(o) = offset.take() {
                request = request.offset(o);
            }

            let page = self
                .client
                .scroll(request)
                .await
                .map_err(|e| BackendError::operation("scroll", e))?;

            records.extend(page.result.into_iter().filter_map(|p| {
                let id = p.id?;
                Some(Self::point_to_record(id, p.payload, p.vectors))
            }));

            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(records
            .into_iter()
            .filter(|r| r.matches(filters))
            .collect())
    }

    async fn count(&self, namespace_id: &str) -> Result<usize, BackendError> {
        let name = self.collection_name(namespace_id);
        if !self.collection_exists(&name).await? {
            return Ok(0);
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(&name).exact(true))
            .await
            .map_err(|e| BackendError::operation("count", e))?;
        Ok(response.result.map_or(0, |r| r.count as usize))
    }

    fn backend_name(&self) -> &'static str {
        "qdrant"
    }
}
