use errors::StoreError;
use thiserror::Error;

/// Failures reported by a vector engine.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Cannot reach vector engine at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("Vector engine unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Vector has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unusable point payload: {reason}")]
    Payload { reason: String },

    #[error("Vector engine {operation} failed: {reason}")]
    Operation {
        operation: &'static str,
        reason: String,
    },
}

impl BackendError {
    pub fn operation(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        BackendError::Operation {
            operation,
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Payload {
            reason: e.to_string(),
        }
    }
}

impl From<BackendError> for StoreError {
    fn from(e: BackendError) -> Self {
        StoreError::backend("vector", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = BackendError::operation("upsert", "collection is read-only");
        assert_eq!(
            err.to_string(),
            "Vector engine upsert failed: collection is read-only"
        );

        let err = BackendError::DimensionMismatch {
            expected: 384,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Vector has 3 dimensions, collection expects 384"
        );
    }

    #[test]
    fn test_conversion_to_store_error() {
        let err: StoreError = BackendError::Connection {
            endpoint: "localhost:6334".into(),
            reason: "refused".into(),
        }
        .into();
        assert!(err.is_hard_failure());
        assert!(err.to_string().contains("localhost:6334"));
    }
}
