//! # Knowledge
//!
//! Curation of the entity store's knowledge: conflict resolution for new
//! entities, guideline generation from conversations, retrieval of
//! guidelines by task and consolidation of overlapping guidelines.

pub mod consolidation;
pub mod engine;
pub mod error;
pub mod generator;
pub mod llm;
pub mod prompts;
pub mod resolver;
pub mod retrieval;

pub use consolidation::{ClusterFailure, ConsolidationReport, Consolidator};
pub use engine::{ConflictResolutionEngine, ResolutionOutcome};
pub use error::{GenerationError, LlmCallError, ResolutionError};
pub use generator::LlmGuidelineGenerator;
pub use llm::{CallPolicy, clean_llm_response};
pub use resolver::LlmResolver;
pub use retrieval::{GuidelineRetriever, TaskGuidelines};
