//! # Configuration System
//!
//! Explicit configuration for the Memory-Knowledge entity store.
//!
//! This crate provides:
//! - Configuration structures for the store, LLM collaborators, conflict
//!   resolution, sync and consolidation
//! - Environment variable loading (`MK_*`)
//! - Configuration file loading (TOML/YAML)
//! - Configuration validation
//!
//! The configuration is built once and passed to constructors; core logic
//! never reads the environment itself.

pub mod config;
pub mod error;
pub mod file_loader;
pub mod loader;

pub use config::{
    Config, ConsolidationConfig, LlmConfig, ResolutionConfig, StoreBackend, StoreConfig,
    SyncConfig, VectorEngine,
};
pub use error::ConfigError;
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::load_from_env;
pub use validator::Validate;
