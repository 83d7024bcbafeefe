//! # Environment Variable Loader
//!
//! Loads configuration from `MK_*` environment variables over defaults.
//!
//! # Naming Convention
//! - `MK_STORE_*`: Entity store settings
//! - `MK_LLM_*`: LLM collaborator settings
//! - `MK_RESOLUTION_*`: Conflict resolution settings
//! - `MK_SYNC_*`: Trajectory sync settings
//! - `MK_CONSOLIDATION_*`: Guideline consolidation settings

use crate::config::{
    Config, ConsolidationConfig, LlmConfig, ResolutionConfig, StoreConfig, SyncConfig,
};
use crate::error::ConfigError;
use std::env;
use std::str::FromStr;
use validator::Validate;

/// Load configuration from environment variables.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Builds the explicit configuration value once at process start. Unset
/// variables keep their defaults; set but unparseable variables are errors.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("Backend: {}", config.store.backend);
///     Ok(())
/// }
/// ```
///
/// ## Environment Variables
/// ### Store
/// - `MK_STORE_BACKEND`: filesystem/indexed (default: filesystem)
/// - `MK_STORE_DATA_DIR`: Namespace file directory (default: "mk_data")
/// - `MK_STORE_REGISTRY_URL`: SQLite registry URL
/// - `MK_STORE_VECTOR_ENGINE`: qdrant/in_memory (default: qdrant)
/// - `MK_STORE_QDRANT_URL`, `MK_STORE_QDRANT_API_KEY`
/// - `MK_STORE_COLLECTION_PREFIX`, `MK_STORE_EMBEDDING_DIMENSION`
///
/// ### LLM
/// - `MK_LLM_API_KEY` (falls back to `OPENAI_API_KEY`), `MK_LLM_BASE_URL`
/// - `MK_LLM_RESOLUTION_MODEL`, `MK_LLM_GENERATION_MODEL`,
///   `MK_LLM_EMBEDDING_MODEL`
/// - `MK_LLM_TIMEOUT_MS`, `MK_LLM_MAX_ATTEMPTS`
///
/// ### Resolution
/// - `MK_RESOLUTION_TOP_K`, `MK_RESOLUTION_SIMILARITY_THRESHOLD`
///
/// ### Sync
/// - `MK_SYNC_TRACE_SOURCE_URL`, `MK_SYNC_PROJECT`, `MK_SYNC_NAMESPACE_ID`
/// - `MK_SYNC_PAGE_SIZE`, `MK_SYNC_MAX_SPANS`, `MK_SYNC_LLM_SPAN_NAME`
/// - `MK_SYNC_INCLUDE_ERRORS`, `MK_SYNC_STATE_DIR`,
///   `MK_SYNC_REQUEST_TIMEOUT_MS`
///
/// ### Consolidation
/// - `MK_CONSOLIDATION_CLUSTERING_THRESHOLD`,
///   `MK_CONSOLIDATION_MAX_ENTITIES`
pub fn load_from_env() -> Result<Config, ConfigError> {
    let config = Config {
        store: load_store_from_env()?,
        llm: load_llm_from_env()?,
        resolution: load_resolution_from_env()?,
        sync: load_sync_from_env()?,
        consolidation: load_consolidation_from_env()?,
    };

    config.validate()?;
    Ok(config)
}

fn load_store_from_env() -> Result<StoreConfig, ConfigError> {
    let defaults = StoreConfig::default();
    Ok(StoreConfig {
        backend: parse_env("MK_STORE_BACKEND")?.unwrap_or(defaults.backend),
        data_dir: string_env("MK_STORE_DATA_DIR").unwrap_or(defaults.data_dir),
        registry_url: string_env("MK_STORE_REGISTRY_URL").unwrap_or(defaults.registry_url),
        vector_engine: parse_env("MK_STORE_VECTOR_ENGINE")?.unwrap_or(defaults.vector_engine),
        qdrant_url: string_env("MK_STORE_QDRANT_URL").unwrap_or(defaults.qdrant_url),
        qdrant_api_key: string_env("MK_STORE_QDRANT_API_KEY"),
        collection_prefix: string_env("MK_STORE_COLLECTION_PREFIX")
            .unwrap_or(defaults.collection_prefix),
        embedding_dimension: parse_env("MK_STORE_EMBEDDING_DIMENSION")?
            .unwrap_or(defaults.embedding_dimension),
    })
}

fn load_llm_from_env() -> Result<LlmConfig, ConfigError> {
    let defaults = LlmConfig::default();
    Ok(LlmConfig {
        api_key: string_env("MK_LLM_API_KEY").or_else(|| string_env("OPENAI_API_KEY")),
        base_url: string_env("MK_LLM_BASE_URL"),
        resolution_model: string_env("MK_LLM_RESOLUTION_MODEL")
            .unwrap_or(defaults.resolution_model),
        generation_model: string_env("MK_LLM_GENERATION_MODEL")
            .unwrap_or(defaults.generation_model),
        embedding_model: string_env("MK_LLM_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
        timeout_ms: parse_env("MK_LLM_TIMEOUT_MS")?.unwrap_or(defaults.timeout_ms),
        max_attempts: parse_env("MK_LLM_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
    })
}

fn load_resolution_from_env() -> Result<ResolutionConfig, ConfigError> {
    let defaults = ResolutionConfig::default();
    Ok(ResolutionConfig {
        top_k: parse_env("MK_RESOLUTION_TOP_K")?.unwrap_or(defaults.top_k),
        similarity_threshold: parse_env("MK_RESOLUTION_SIMILARITY_THRESHOLD")?
            .unwrap_or(defaults.similarity_threshold),
    })
}

fn load_sync_from_env() -> Result<SyncConfig, ConfigError> {
    let defaults = SyncConfig::default();
    Ok(SyncConfig {
        trace_source_url: string_env("MK_SYNC_TRACE_SOURCE_URL")
            .unwrap_or(defaults.trace_source_url),
        project: string_env("MK_SYNC_PROJECT").unwrap_or(defaults.project),
        namespace_id: string_env("MK_SYNC_NAMESPACE_ID").unwrap_or(defaults.namespace_id),
        page_size: parse_env("MK_SYNC_PAGE_SIZE")?.unwrap_or(defaults.page_size),
        max_spans: parse_env("MK_SYNC_MAX_SPANS")?.unwrap_or(defaults.max_spans),
        llm_span_name: string_env("MK_SYNC_LLM_SPAN_NAME").unwrap_or(defaults.llm_span_name),
        include_errors: parse_env("MK_SYNC_INCLUDE_ERRORS")?.unwrap_or(defaults.include_errors),
        state_dir: string_env("MK_SYNC_STATE_DIR").unwrap_or(defaults.state_dir),
        request_timeout_ms: parse_env("MK_SYNC_REQUEST_TIMEOUT_MS")?
            .unwrap_or(defaults.request_timeout_ms),
    })
}

fn load_consolidation_from_env() -> Result<ConsolidationConfig, ConfigError> {
    let defaults = ConsolidationConfig::default();
    Ok(ConsolidationConfig {
        clustering_threshold: parse_env("MK_CONSOLIDATION_CLUSTERING_THRESHOLD")?
            .unwrap_or(defaults.clustering_threshold),
        max_entities: parse_env("MK_CONSOLIDATION_MAX_ENTITIES")?
            .unwrap_or(defaults.max_entities),
    })
}

fn string_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match string_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}
