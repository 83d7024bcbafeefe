//! # Memory-Knowledge Core
//!
//! Shared types and traits for the Memory-Knowledge entity store.
//!
//! This crate provides:
//! - The namespaced entity model with typed metadata payloads
//! - The normalized message model used for trajectories
//! - The `EntityStore` contract and collaborator traits

pub mod messages;
pub mod traits;
pub mod types;

pub use messages::{FunctionCall, Message, MessageRole, ToolCall};
pub use traits::{
    BoxError, ConflictResolver, EmbeddingService, EntityStore, GuidelineGenerator, HealthStatus,
    LlmService, SharedEmbedder, SharedLlm, SharedStore,
};
pub use types::{
    Entity, EntityKind, EntityPayload, EntityQuery, GeneratedGuidelines, GuidelineCategory,
    GuidelineDraft, GuidelinePayload, Metadata, Namespace, NamespaceSummary, NewEntity,
    PolicyPayload, PolicyTrigger, PolicyType, ResolutionAction, SearchHit, StoreHealth,
    TokenUsage, TrajectoryPayload, TriggerType, Verdict,
};
