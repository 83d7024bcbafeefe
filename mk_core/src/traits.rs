//! Capability traits implemented by the storage backends and the external
//! collaborators (embedding, LLM, decision engine, guideline generator).

use crate::messages::Message;
use crate::types::{
    Entity, EntityQuery, GeneratedGuidelines, Namespace, NamespaceSummary, NewEntity, SearchHit,
    StoreHealth, Verdict,
};
use async_trait::async_trait;
use errors::StoreResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Storage contract implemented identically by every backend.
///
/// # Errors
///
/// - `NotFound` when the namespace or entity does not exist.
/// - `AlreadyExists` when creating a namespace whose id is taken.
/// - `InvalidEntity` for empty content or malformed typed metadata.
/// - `BackendUnavailable` when persistence fails.
/// - `CollaboratorUnavailable` when a backend depends on an embedding
///   service that failed. Nothing is written in that case.
#[async_trait]
pub trait EntityStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Cheap readiness probe of the underlying storage.
    async fn ready(&self) -> StoreHealth;

    /// Creates a namespace. A fresh id is minted when `id` is `None`.
    async fn create_namespace(&self, id: Option<&str>) -> StoreResult<Namespace>;

    async fn get_namespace(&self, id: &str) -> StoreResult<NamespaceSummary>;

    /// Deletes a namespace and every entity in it.
    async fn delete_namespace(&self, id: &str) -> StoreResult<()>;

    async fn list_namespaces(&self) -> StoreResult<Vec<NamespaceSummary>>;

    /// Adds an entity under a fresh backend-assigned id.
    async fn add_entity(&self, namespace_id: &str, entity: NewEntity) -> StoreResult<Entity>;

    async fn get_entity(&self, namespace_id: &str, entity_id: &str) -> StoreResult<Entity>;

    async fn delete_entity(&self, namespace_id: &str, entity_id: &str) -> StoreResult<()>;

    async fn list_entities(
        &self,
        namespace_id: &str,
        query: &EntityQuery,
    ) -> StoreResult<Vec<Entity>>;

    /// Relevance-ordered search restricted by type and metadata filters.
    async fn search_entities(
        &self,
        namespace_id: &str,
        text: &str,
        query: &EntityQuery,
        limit: usize,
    ) -> StoreResult<Vec<SearchHit>>;
}

pub type SharedStore = Arc<dyn EntityStore>;

/// Health status for service monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    type Error;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, Self::Error>;

    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Self::Error> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }
}

pub type SharedEmbedder = Arc<dyn EmbeddingService<Error = BoxError> + Send + Sync>;

/// LLM service trait for text generation
#[async_trait]
pub trait LlmService: Send + Sync {
    type Error;

    /// Generates text for a system and user prompt pair.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, Self::Error>;
}

pub type SharedLlm = Arc<dyn LlmService<Error = BoxError> + Send + Sync>;

/// Decides how a candidate entity relates to similar existing entities.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, candidate: &NewEntity, existing: &[Entity]) -> StoreResult<Verdict>;
}

/// Distills reusable guidelines from a normalized conversation.
#[async_trait]
pub trait GuidelineGenerator: Send + Sync {
    async fn generate(&self, messages: &[Message]) -> StoreResult<GeneratedGuidelines>;
}
