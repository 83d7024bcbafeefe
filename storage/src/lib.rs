//! # Storage Layer
//!
//! Durable pieces of the entity store that do not need a vector engine:
//! the one-file-per-namespace backend and the SQLite namespace registry.

pub mod filesystem;
pub mod registry;

pub use filesystem::FileEntityStore;
pub use registry::NamespaceRegistry;
