//! Builds stores and collaborators from the explicit configuration value.

use crate::backends::{InMemoryVectorBackend, QdrantBackend, QdrantConfig, VectorBackend};
use crate::embedding::MockEmbeddingService;
use crate::indexed::IndexedEntityStore;
use config::{Config, LlmConfig, StoreBackend, StoreConfig, VectorEngine};
use errors::StoreResult;
use mk_core::traits::{SharedEmbedder, SharedLlm, SharedStore};
use std::sync::Arc;
use storage::{FileEntityStore, NamespaceRegistry};
use tracing::info;

pub fn build_vector_backend(config: &StoreConfig) -> StoreResult<Arc<dyn VectorBackend>> {
    Ok(match config.vector_engine {
        VectorEngine::Qdrant => Arc::new(QdrantBackend::new(
            QdrantConfig {
                url: config.qdrant_url.clone(),
                api_key: config.qdrant_api_key.clone(),
                collection_prefix: config.collection_prefix.clone(),
            },
            config.embedding_dimension,
        )?),
        VectorEngine::InMemory => Arc::new(InMemoryVectorBackend::new(config.embedding_dimension)),
    })
}

/// Builds the configured entity store.
pub async fn build_store(
    config: &StoreConfig,
    embedder: SharedEmbedder,
) -> StoreResult<SharedStore> {
    match config.backend {
        StoreBackend::Filesystem => {
            info!(data_dir = %config.data_dir, "Using filesystem entity store");
            Ok(Arc::new(FileEntityStore::open(&config.data_dir)?))
        }
        StoreBackend::Indexed => {
            info!(
                engine = %config.vector_engine,
                registry = %config.registry_url,
                "Using indexed entity store"
            );
            let registry = NamespaceRegistry::connect(&config.registry_url).await?;
            let vectors = build_vector_backend(config)?;
            Ok(Arc::new(IndexedEntityStore::new(registry, vectors, embedder)))
        }
    }
}

/// The real embedding service when it is compiled in and keyed, else the
/// deterministic hashing embedder.
pub fn build_embedder(config: &Config) -> SharedEmbedder {
    #[cfg(feature = "embedding-integration")]
    if let Some(api_key) = &config.llm.api_key {
        return Arc::new(crate::embedding::OpenAIEmbeddingService::new(
            api_key.clone(),
            &config.llm.embedding_model,
            config.store.embedding_dimension,
            config.llm.base_url.as_deref(),
        ));
    }

    info!(
        dimension = config.store.embedding_dimension,
        "Using hashing embedder"
    );
    Arc::new(MockEmbeddingService::new(config.store.embedding_dimension))
}

/// An LLM client for `model`, or `None` when no provider is available.
pub fn build_llm(config: &LlmConfig, model: &str) -> Option<SharedLlm> {
    #[cfg(feature = "llm-integration")]
    if let Some(api_key) = &config.api_key {
        return Some(Arc::new(crate::llm::OpenAILlmService::new(
            api_key.clone(),
            model.to_string(),
            config.base_url.as_deref(),
        )));
    }

    let _ = (config, model);
    None
}
