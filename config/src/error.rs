use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidEnv { key: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error(transparent)]
    File(#[from] crate::file_loader::ConfigFileError),
}
