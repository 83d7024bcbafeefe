//! Trajectory records are a read-side projection over the trajectory
//! entities sharing one trace id.

use chrono::{DateTime, Utc};
use errors::StoreResult;
use mk_core::messages::Message;
use mk_core::traits::EntityStore;
use mk_core::types::{Entity, EntityKind, EntityQuery, TokenUsage};
use serde::Serialize;
use tracing::{instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrajectoryRecord {
    pub trace_id: String,
    /// Contributing span ids, in message order.
    pub span_ids: Vec<String>,
    pub messages: Vec<Message>,
    pub usage: TokenUsage,
}

impl TrajectoryRecord {
    /// Assembles the record for `trace_id` from `entities`, which may hold
    /// unrelated entities. Spans are ordered by start time, then by their
    /// position in `entities`. Returns `None` if no entity belongs to the
    /// trace.
    pub fn project(trace_id: &str, entities: &[Entity]) -> Option<Self> {
        let mut parts: Vec<(Option<DateTime<Utc>>, &Entity)> = entities
            .iter()
            .filter_map(|entity| {
                let payload = entity.as_trajectory()?;
                (payload.trace_id.as_deref() == Some(trace_id))
                    .then(|| (parse_timestamp(payload.timestamp.as_deref()), entity))
            })
            .collect();
        if parts.is_empty() {
            return None;
        }
        // Stable: equal or missing timestamps keep insertion order.
        parts.sort_by_key(|(ts, _)| (ts.is_none(), *ts));

        let mut record = TrajectoryRecord {
            trace_id: trace_id.to_string(),
            ..Self::default()
        };
        for (_, entity) in parts {
            let Some(payload) = entity.as_trajectory() else {
                continue;
            };
            if let Some(span_id) = &payload.span_id {
                record.span_ids.push(span_id.clone());
            }
            if let Some(usage) = &payload.usage {
                record.usage.prompt_tokens = add(record.usage.prompt_tokens, usage.prompt_tokens);
                record.usage.completion_tokens =
                    add(record.usage.completion_tokens, usage.completion_tokens);
                record.usage.total_tokens = add(record.usage.total_tokens, usage.total_tokens);
            }
            match serde_json::from_str::<Vec<Message>>(&entity.content) {
                Ok(messages) => record.messages.extend(messages),
                Err(e) => {
                    warn!(
                        entity_id = %entity.id,
                        error = %e,
                        "Trajectory content is not a message list"
                    );
                }
            }
        }
        Some(record)
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn add(total: Option<u64>, value: Option<u64>) -> Option<u64> {
    match (total, value) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

/// Loads the trajectory recorded for `trace_id` in a namespace.
#[instrument(skip(store), fields(namespace = %namespace_id))]
pub async fn load_trajectory(
    store: &dyn EntityStore,
    namespace_id: &str,
    trace_id: &str,
) -> StoreResult<Option<TrajectoryRecord>> {
    let entities = store
        .list_entities(
            namespace_id,
            &EntityQuery::of_kind(EntityKind::Trajectory).with_filter("trace_id", trace_id),
        )
        .await?;
    Ok(TrajectoryRecord::project(trace_id, &entities))
}
