use chrono::{DateTime, Utc};
use mk_core::types::{GuidelinePayload, NewEntity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cross-invocation sync state for one namespace and project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    #[serde(default)]
    pub processed_span_ids: BTreeSet<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: SyncStats,
    /// Guidelines of processed spans that a store outage kept from being
    /// submitted. Retried before the next page is fetched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_guidelines: Vec<PendingGuideline>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingGuideline {
    pub span_id: String,
    pub content: String,
    pub metadata: GuidelinePayload,
}

impl PendingGuideline {
    pub fn to_entity(&self) -> NewEntity {
        NewEntity::guideline(self.content.clone(), self.metadata.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub total_syncs: u64,
    pub total_spans_processed: u64,
    pub total_guidelines_generated: u64,
    pub total_errors: u64,
}

impl SyncState {
    pub fn is_processed(&self, span_id: &str) -> bool {
        self.processed_span_ids.contains(span_id)
    }

    /// Returns false if the span was already recorded.
    pub fn mark_processed(&mut self, span_id: impl Into<String>) -> bool {
        self.processed_span_ids.insert(span_id.into())
    }
}

/// File-name-safe key for a namespace and project pair.
pub fn state_key(namespace_id: &str, project: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{}__{}", sanitize(namespace_id), sanitize(project))
}
