//! Manual ingestion of a caller-supplied conversation, outside of span sync.

use crate::pipeline::ensure_namespace;
use errors::{StoreError, StoreResult};
use knowledge::{ConflictResolutionEngine, ResolutionOutcome};
use mk_core::messages::Message;
use mk_core::traits::GuidelineGenerator;
use mk_core::types::{Entity, NewEntity, TrajectoryPayload};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub task_id: String,
    pub trajectory: Entity,
    pub guidelines: Vec<ResolutionOutcome>,
    /// Set when guideline generation failed. The trajectory is still stored.
    pub generation_error: Option<String>,
}

pub struct TrajectoryIngestor {
    engine: Arc<ConflictResolutionEngine>,
    generator: Arc<dyn GuidelineGenerator>,
}

impl TrajectoryIngestor {
    pub fn new(
        engine: Arc<ConflictResolutionEngine>,
        generator: Arc<dyn GuidelineGenerator>,
    ) -> Self {
        Self { engine, generator }
    }

    /// Stores `messages` as one trajectory and resolves the guidelines
    /// generated from it. A task id is minted when none is given.
    #[instrument(
        skip(self, messages),
        fields(namespace = %namespace_id, messages = messages.len())
    )]
    pub async fn ingest(
        &self,
        namespace_id: &str,
        messages: Vec<Message>,
        task_id: Option<String>,
    ) -> StoreResult<IngestReport> {
        if messages.iter().all(Message::is_empty) {
            return Err(StoreError::invalid("trajectory has no messages"));
        }
        let task_id = task_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let store = self.engine.store();
        ensure_namespace(store.as_ref(), namespace_id).await?;

        let content = serde_json::to_string(&messages)
            .map_err(|e| StoreError::invalid(format!("unserializable trajectory: {e}")))?;
        let payload = TrajectoryPayload {
            message_count: Some(messages.len()),
            task_id: Some(task_id.clone()),
            ..TrajectoryPayload::default()
        };
        let trajectory = store
            .add_entity(namespace_id, NewEntity::trajectory(content, payload))
            .await?;

        let mut report = IngestReport {
            task_id,
            trajectory,
            guidelines: Vec::new(),
            generation_error: None,
        };

        let generated = match self.generator.generate(&messages).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!(
                    task_id = %report.task_id,
                    error = %e,
                    "Guideline generation failed, trajectory kept"
                );
                report.generation_error = Some(e.to_string());
                return Ok(report);
            }
        };

        for draft in generated.guidelines {
            let (content, mut payload) = draft.into_payload();
            payload = payload
                .with_extra("source_task_id", report.task_id.as_str())
                .with_extra("creation_mode", "manual");
            if let Some(task) = &generated.task_description {
                payload = payload.with_extra("task_description", task.as_str());
            }
            let outcome = self
                .engine
                .submit(namespace_id, NewEntity::guideline(content, payload), true)
                .await?;
            report.guidelines.push(outcome);
        }

        info!(
            task_id = %report.task_id,
            guidelines = report.guidelines.len(),
            "Trajectory ingested"
        );
        Ok(report)
    }
}
