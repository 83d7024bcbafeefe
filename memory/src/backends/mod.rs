//! Vector engines behind the indexed entity store.
//!
//! | Backend | Isolation | Persistence |
//! |---------|-----------|-------------|
//! | Qdrant | Collection per namespace | Server |
//! | In-memory | Map per namespace | Process lifetime |

pub mod error;
pub mod in_memory;
pub mod qdrant;
pub mod types;

pub use error::BackendError;
pub use in_memory::InMemoryVectorBackend;
pub use qdrant::{QdrantBackend, QdrantConfig};
pub use types::{
    DeleteResult, HealthStatus, Payload, SearchQuery, SearchResult, UpsertResult, VectorRecord,
    cosine_similarity,
};

use async_trait::async_trait;

/// Unified trait for vector engines.
///
/// Every operation is scoped to a namespace, which the engine maps onto its
/// own isolation unit. Reads against a namespace that has no collection yet
/// behave as if the collection were empty.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn health_check(&self) -> Result<HealthStatus, BackendError>;

    /// Creates the namespace's collection if it does not exist.
    async fn create_collection(&self, namespace_id: &str) -> Result<(), BackendError>;

    /// Drops the namespace's collection and all of its vectors.
    async fn drop_collection(&self, namespace_id: &str) -> Result<(), BackendError>;

    async fn upsert(
        &self,
        namespace_id: &str,
        vectors: Vec<VectorRecord>,
    ) -> Result<UpsertResult, BackendError>;

    /// Ranked similarity search, most similar first.
    async fn search(
        &self,
        namespace_id: &str,
        query: SearchQuery,
    ) -> Result<Vec<SearchResult>, BackendError>;

    async fn delete(
        &self,
        namespace_id: &str,
        ids: Vec<String>,
    ) -> Result<DeleteResult, BackendError>;

    async fn get(
        &self,
        namespace_id: &str,
        id: &str,
    ) -> Result<Option<VectorRecord>, BackendError>;

    /// Every record matching the filters, in no particular order.
    async fn scroll(
        &self,
        namespace_id: &str,
        filters: &Payload,
    ) -> Result<Vec<VectorRecord>, BackendError>;

    async fn count(&self, namespace_id: &str) -> Result<usize, BackendError>;

    fn backend_name(&self) -> &'static str;
}
