//! # Memory System
//!
//! The indexed entity store and the services it depends on:
//! - Vector engines (Qdrant, in-process) behind `VectorBackend`
//! - Embedding and LLM service implementations
//! - A factory that builds the configured store

pub mod backends;
pub mod embedding;
pub mod factory;
pub mod indexed;
pub mod llm;

pub use factory::{build_embedder, build_llm, build_store, build_vector_backend};
pub use indexed::IndexedEntityStore;
