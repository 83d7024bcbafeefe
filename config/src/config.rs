//! # Configuration Structures
//!
//! This module defines the configuration value for the Memory-Knowledge
//! entity store.
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization, every field defaulted
//! - Use `validator` for range checks
//! - Are built once at process start and passed to constructors

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

/// Main configuration structure for the Memory-Knowledge entity store.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Aggregates the settings for the storage backend, the LLM collaborators,
/// conflict resolution, trajectory sync and guideline consolidation.
///
/// ## Usage
/// ```rust,no_run
/// use config::Config;
///
/// let config = Config::default();
/// println!("Data directory: {}", config.store.data_dir);
/// ```
///
/// ## Validation
/// All nested configurations must pass their own validation rules.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Entity store backend selection and location
    #[serde(default)]
    #[validate(nested)]
    pub store: StoreConfig,

    /// LLM models, timeout and retries
    #[serde(default)]
    #[validate(nested)]
    pub llm: LlmConfig,

    /// Conflict resolution tuning
    #[serde(default)]
    #[validate(nested)]
    pub resolution: ResolutionConfig,

    /// Trajectory sync source and bounds
    #[serde(default)]
    #[validate(nested)]
    pub sync: SyncConfig,

    /// Guideline consolidation tuning
    #[serde(default)]
    #[validate(nested)]
    pub consolidation: ConsolidationConfig,
}

/// Which entity store implementation to build.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StoreBackend {
    /// One JSON file per namespace
    #[default]
    Filesystem,
    /// Vector engine plus SQLite namespace registry
    Indexed,
}

/// Which vector engine backs the indexed store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum VectorEngine {
    #[default]
    Qdrant,
    InMemory,
}

/// Entity store configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Fields
/// - `backend`: `filesystem` or `indexed` (default: filesystem)
/// - `data_dir`: Directory holding one file per namespace (default: "mk_data")
/// - `registry_url`: SQLite URL of the namespace registry used by the indexed
///   backend (default: "sqlite://mk_registry.db")
/// - `vector_engine`: `qdrant` or `in_memory` (default: qdrant)
/// - `qdrant_url`: Qdrant gRPC endpoint (default: "http://localhost:6334")
/// - `qdrant_api_key`: Optional Qdrant API key
/// - `collection_prefix`: Prefix of per-namespace collections (default: "mk")
/// - `embedding_dimension`: Vector size (default: 384, range: 1-8192)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_data_dir")]
    #[validate(length(min = 1))]
    pub data_dir: String,

    #[serde(default = "default_registry_url")]
    #[validate(length(min = 1))]
    pub registry_url: String,

    #[serde(default)]
    pub vector_engine: VectorEngine,

    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    #[serde(default)]
    pub qdrant_api_key: Option<String>,

    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    #[serde(default = "default_embedding_dimension")]
    #[validate(range(min = 1, max = 8192))]
    pub embedding_dimension: usize,
}

fn default_data_dir() -> String {
    "mk_data".to_string()
}

fn default_registry_url() -> String {
    "sqlite://mk_registry.db".to_string()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection_prefix() -> String {
    "mk".to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
            registry_url: default_registry_url(),
            vector_engine: VectorEngine::default(),
            qdrant_url: default_qdrant_url(),
            qdrant_api_key: None,
            collection_prefix: default_collection_prefix(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

/// LLM collaborator configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Fields
/// - `api_key`: Optional provider API key
/// - `base_url`: Optional OpenAI-compatible endpoint override
/// - `resolution_model`: Model used by the conflict resolver (default: "gpt-4o")
/// - `generation_model`: Model used by the guideline generator (default: "gpt-4o")
/// - `embedding_model`: Embedding model (default: "text-embedding-3-small")
/// - `timeout_ms`: Per-attempt timeout (default: 30000)
/// - `max_attempts`: Attempts per call, at least 1 (default: 3)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    #[validate(length(min = 1))]
    pub resolution_model: String,

    #[serde(default = "default_model")]
    #[validate(length(min = 1))]
    pub generation_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            resolution_model: default_model(),
            generation_model: default_model(),
            embedding_model: default_embedding_model(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Conflict resolution configuration.
///
/// ## Fields
/// - `top_k`: Neighbours retrieved for a candidate (default: 10, range: 1-100)
/// - `similarity_threshold`: Minimum relevance for a neighbour to be
///   presented to the decision engine (default: 0.5, range: 0.0-1.0)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ResolutionConfig {
    #[serde(default = "default_top_k")]
    #[validate(range(min = 1, max = 100))]
    pub top_k: usize,

    #[serde(default = "default_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f32,
}

fn default_top_k() -> usize {
    10
}

fn default_similarity_threshold() -> f32 {
    0.5
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Trajectory sync configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Fields
/// - `trace_source_url`: Base URL of the trace source (default:
///   "http://localhost:6006")
/// - `project`: Upstream project name (default: "default")
/// - `namespace_id`: Target namespace (default: "default")
/// - `page_size`: Spans requested per page (default: 100, range: 1-100)
/// - `max_spans`: Spans fetched per invocation (default: 100)
/// - `llm_span_name`: Span name identifying LLM requests (default:
///   "litellm_request")
/// - `include_errors`: Keep spans whose status is ERROR (default: false)
/// - `state_dir`: Directory for persisted cursors (default: "mk_data/sync")
/// - `request_timeout_ms`: Per-page HTTP timeout (default: 30000)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_trace_source_url")]
    #[validate(length(min = 1))]
    pub trace_source_url: String,

    #[serde(default = "default_name")]
    #[validate(length(min = 1))]
    pub project: String,

    #[serde(default = "default_name")]
    #[validate(length(min = 1, max = 128))]
    pub namespace_id: String,

    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 100))]
    pub page_size: usize,

    #[serde(default = "default_max_spans")]
    #[validate(range(min = 1))]
    pub max_spans: usize,

    #[serde(default = "default_llm_span_name")]
    pub llm_span_name: String,

    #[serde(default)]
    pub include_errors: bool,

    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,
}

fn default_trace_source_url() -> String {
    "http://localhost:6006".to_string()
}

fn default_name() -> String {
    "default".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_max_spans() -> usize {
    100
}

fn default_llm_span_name() -> String {
    "litellm_request".to_string()
}

fn default_state_dir() -> String {
    "mk_data/sync".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            trace_source_url: default_trace_source_url(),
            project: default_name(),
            namespace_id: default_name(),
            page_size: default_page_size(),
            max_spans: default_max_spans(),
            llm_span_name: default_llm_span_name(),
            include_errors: false,
            state_dir: default_state_dir(),
            request_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Guideline consolidation configuration.
///
/// ## Fields
/// - `clustering_threshold`: Cosine similarity joining two guidelines into
///   one cluster (default: 0.80, range: 0.0-1.0)
/// - `max_entities`: Guidelines considered per run (default: 5000)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ConsolidationConfig {
    #[serde(default = "default_clustering_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub clustering_threshold: f32,

    #[serde(default = "default_max_entities")]
    #[validate(range(min = 2))]
    pub max_entities: usize,
}

fn default_clustering_threshold() -> f32 {
    0.80
}

fn default_max_entities() -> usize {
    5000
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            clustering_threshold: default_clustering_threshold(),
            max_entities: default_max_entities(),
        }
    }
}
