//! # Memory-Knowledge Errors
//!
//! Error taxonomy shared by the entity store, the conflict resolution engine
//! and the trajectory sync pipeline.
//!
//! - `NotFound`, `AlreadyExists` and `InvalidEntity` are caller-input errors.
//!   They surface immediately and are never retried.
//! - `CollaboratorUnavailable` covers embedding and LLM services. Callers
//!   decide whether to degrade (conflict resolution falls back to insert).
//! - `BackendUnavailable` and `UpstreamUnavailable` abort a sync invocation.

use std::fmt;
use thiserror::Error;

/// The kind of resource a `NotFound` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Namespace,
    Entity,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Namespace => f.write_str("Namespace"),
            Resource::Entity => f.write_str("Entity"),
        }
    }
}

/// Entity store errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: Resource, id: String },

    #[error("Namespace already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Invalid entity: {reason}")]
    InvalidEntity { reason: String },

    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Collaborator {collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: String,
        reason: String,
    },

    #[error("Upstream trace source unavailable: {reason}")]
    UpstreamUnavailable { reason: String },
}

impl StoreError {
    pub fn namespace_not_found(namespace_id: impl Into<String>) -> Self {
        StoreError::NotFound {
            resource: Resource::Namespace,
            id: namespace_id.into(),
        }
    }

    pub fn entity_not_found(namespace_id: &str, entity_id: &str) -> Self {
        StoreError::NotFound {
            resource: Resource::Entity,
            id: format!("{namespace_id}/{entity_id}"),
        }
    }

    pub fn already_exists(namespace_id: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            id: namespace_id.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        StoreError::InvalidEntity {
            reason: reason.into(),
        }
    }

    pub fn backend(backend: impl Into<String>, reason: impl fmt::Display) -> Self {
        StoreError::BackendUnavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    pub fn collaborator(collaborator: impl Into<String>, reason: impl fmt::Display) -> Self {
        StoreError::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            reason: reason.to_string(),
        }
    }

    pub fn upstream(reason: impl fmt::Display) -> Self {
        StoreError::UpstreamUnavailable {
            reason: reason.to_string(),
        }
    }

    /// Errors caused by the caller's input. Never retried automatically.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. }
                | StoreError::AlreadyExists { .. }
                | StoreError::InvalidEntity { .. }
        )
    }

    /// Errors that abort a whole sync invocation.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            StoreError::BackendUnavailable { .. } | StoreError::UpstreamUnavailable { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                StoreError::namespace_not_found("demo"),
                "Namespace not found: demo",
            ),
            (
                StoreError::entity_not_found("demo", "7"),
                "Entity not found: demo/7",
            ),
            (
                StoreError::already_exists("demo"),
                "Namespace already exists: demo",
            ),
            (
                StoreError::invalid("content must not be empty"),
                "Invalid entity: content must not be empty",
            ),
            (
                StoreError::backend("filesystem", "disk full"),
                "Backend filesystem unavailable: disk full",
            ),
            (
                StoreError::collaborator("embedding", "timeout"),
                "Collaborator embedding unavailable: timeout",
            ),
            (
                StoreError::upstream("connection refused"),
                "Upstream trace source unavailable: connection refused",
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_caller_errors() {
        assert!(StoreError::namespace_not_found("x").is_caller_error());
        assert!(StoreError::already_exists("x").is_caller_error());
        assert!(StoreError::invalid("x").is_caller_error());
        assert!(!StoreError::backend("fs", "x").is_caller_error());
        assert!(!StoreError::collaborator("llm", "x").is_caller_error());
    }

    #[test]
    fn test_hard_failures() {
        assert!(StoreError::backend("fs", "x").is_hard_failure());
        assert!(StoreError::upstream("x").is_hard_failure());
        assert!(!StoreError::collaborator("llm", "x").is_hard_failure());
        assert!(!StoreError::entity_not_found("ns", "1").is_hard_failure());
    }
}
