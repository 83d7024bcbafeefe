//! # Trajectory Sync
//!
//! Pulls LLM request spans from a trace source, normalizes them into
//! trajectories and turns them into conflict-resolved guidelines.

pub mod converter;
pub mod error;
pub mod ingest;
pub mod literal;
pub mod pipeline;
pub mod source;
pub mod span;
pub mod state;
pub mod state_persister;
pub mod trajectory;

#[cfg(test)]
mod proptests;

pub use converter::{ConvertOptions, convert_span};
pub use error::{SyncError, TraceSourceError};
pub use ingest::{IngestReport, TrajectoryIngestor};
pub use pipeline::{SpanError, SyncPipeline, SyncReport, SyncRequest};
pub use source::{HttpTraceSource, TraceSource};
pub use span::{Span, SpanPage};
pub use state::{PendingGuideline, SyncState, SyncStats, state_key};
pub use state_persister::{FileStatePersister, InMemoryStatePersister, SyncStatePersister};
pub use trajectory::{TrajectoryRecord, load_trajectory};
