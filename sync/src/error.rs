use errors::StoreError;
use thiserror::Error;

/// Failures talking to the upstream trace source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TraceSourceError {
    #[error("Request to trace source failed: {reason}")]
    Request { reason: String },

    #[error("Trace source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Undecodable trace source response: {reason}")]
    Decode { reason: String },
}

/// Errors that abort a whole sync invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Upstream unavailable: {0}")]
    Upstream(#[from] TraceSourceError),

    #[error("Store unavailable: {0}")]
    Store(StoreError),

    #[error("State persistence failed: {reason}")]
    Persistence { reason: String },
}

impl SyncError {
    pub fn persistence(reason: impl std::fmt::Display) -> Self {
        SyncError::Persistence {
            reason: reason.to_string(),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UpstreamUnavailable { reason } => {
                SyncError::Upstream(TraceSourceError::Request { reason })
            }
            other => SyncError::Store(other),
        }
    }
}

impl From<TraceSourceError> for StoreError {
    fn from(err: TraceSourceError) -> Self {
        StoreError::upstream(err)
    }
}

impl From<SyncError> for StoreError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Upstream(e) => e.into(),
            SyncError::Store(e) => e,
            SyncError::Persistence { reason } => StoreError::backend("sync-state", reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
