use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type Payload = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Resolves a filter key against the payload. `a.b` addresses key `b` of
    /// the object stored under `a`.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.payload.get(key) {
            return Some(value);
        }
        let (head, rest) = key.split_once('.')?;
        self.payload.get(head)?.as_object()?.get(rest)
    }

    pub fn matches(&self, filters: &Payload) -> bool {
        filters
            .iter()
            .all(|(key, expected)| self.lookup(key) == Some(expected))
    }
}

/// A similarity query. Filters are exact matches resolved with
/// [`VectorRecord::lookup`].
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub score_threshold: Option<f32>,
    pub filters: Payload,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            limit: 10,
            score_threshold: None,
            filters: HashMap::new(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn with_filters(mut self, filters: Payload) -> Self {
        self.filters.extend(filters);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertResult {
    pub upserted_count: usize,
}

impl UpsertResult {
    pub fn success(count: usize) -> Self {
        Self {
            upserted_count: count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: usize,
}

impl DeleteResult {
    pub fn new(count: usize) -> Self {
        Self {
            deleted_count: count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
    pub backend: String,
}

impl HealthStatus {
    pub fn healthy(backend: &str) -> Self {
        Self {
            healthy: true,
            latency_ms: None,
            message: None,
            backend: backend.to_string(),
        }
    }

    pub fn unhealthy(backend: &str, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms: None,
            message: Some(message.into()),
            backend: backend.to_string(),
        }
    }

    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
}

/// Cosine similarity in [-1, 1]. Zero vectors and length mismatches score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
