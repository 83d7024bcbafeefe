//! Conflict resolution: decides whether a candidate entity is inserted,
//! merged into a neighbour, supersedes a neighbour or is discarded.

use crate::error::ResolutionError;
use config::ResolutionConfig;
use errors::StoreResult;
use metrics::counter;
use mk_core::traits::{ConflictResolver, SharedStore};
use mk_core::types::{Entity, EntityQuery, NewEntity, ResolutionAction, Verdict};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What happened to a submitted candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    Inserted { entity: Entity },
    Merged { entity: Entity, replaced_id: String },
    Superseded { entity: Entity, replaced_id: String },
    Discarded { duplicate_of: String },
}

impl ResolutionOutcome {
    pub fn action(&self) -> ResolutionAction {
        match self {
            ResolutionOutcome::Inserted { .. } => ResolutionAction::Insert,
            ResolutionOutcome::Merged { .. } => ResolutionAction::Merge,
            ResolutionOutcome::Superseded { .. } => ResolutionAction::Supersede,
            ResolutionOutcome::Discarded { .. } => ResolutionAction::Discard,
        }
    }

    /// The entity written for the candidate, if any.
    pub fn stored(&self) -> Option<&Entity> {
        match self {
            ResolutionOutcome::Inserted { entity }
            | ResolutionOutcome::Merged { entity, .. }
            | ResolutionOutcome::Superseded { entity, .. } => Some(entity),
            ResolutionOutcome::Discarded { .. } => None,
        }
    }
}

pub struct ConflictResolutionEngine {
    store: SharedStore,
    resolver: Arc<dyn ConflictResolver>,
    config: ResolutionConfig,
}

impl ConflictResolutionEngine {
    pub fn new(
        store: SharedStore,
        resolver: Arc<dyn ConflictResolver>,
        config: ResolutionConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Stores a candidate according to the decision engine's verdict.
    ///
    /// Decision engine failures and unusable verdicts degrade to an insert.
    /// Store errors are returned unchanged.
    #[instrument(
        skip(self, candidate),
        fields(namespace = %namespace_id, kind = %candidate.kind, resolution = enable_resolution)
    )]
    pub async fn submit(
        &self,
        namespace_id: &str,
        candidate: NewEntity,
        enable_resolution: bool,
    ) -> StoreResult<ResolutionOutcome> {
        candidate.validate()?;

        if !enable_resolution {
            return self.insert(namespace_id, candidate).await;
        }

        let neighbours = self.neighbours(namespace_id, &candidate).await?;
        if neighbours.is_empty() {
            debug!("No similar entities, inserting");
            return self.insert(namespace_id, candidate).await;
        }

        let verdict = match self.resolver.resolve(&candidate, &neighbours).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Decision engine failed, falling back to insert");
                counter!("resolution.fallbacks", "reason" => "resolver_error").increment(1);
                return self.insert(namespace_id, candidate).await;
            }
        };

        if let Err(e) = check_verdict(&verdict, &neighbours) {
            warn!(error = %e, ?verdict, "Unusable verdict, falling back to insert");
            counter!("resolution.fallbacks", "reason" => "invalid_verdict").increment(1);
            return self.insert(namespace_id, candidate).await;
        }

        self.apply(namespace_id, candidate, verdict, &neighbours).await
    }

    async fn neighbours(
        &self,
        namespace_id: &str,
        candidate: &NewEntity,
    ) -> StoreResult<Vec<Entity>> {
        let hits = self
            .store
            .search_entities(
                namespace_id,
                &candidate.content,
                &EntityQuery::of_kind(candidate.kind.clone()),
                self.config.top_k,
            )
            .await?;

        Ok(hits
            .into_iter()
            .filter(|hit| hit.score >= self.config.similarity_threshold)
            .map(|hit| hit.entity)
            .collect())
    }

    async fn apply(
        &self,
        namespace_id: &str,
        candidate: NewEntity,
        verdict: Verdict,
        neighbours: &[Entity],
    ) -> StoreResult<ResolutionOutcome> {
        let target = verdict
            .target_id
            .as_deref()
            .and_then(|id| neighbours.iter().find(|e| e.id == id));

        // A discard needs no target; it counts against the closest neighbour.
        let target = match verdict.action {
            ResolutionAction::Discard => target.or(neighbours.first()),
            _ => target,
        };

        let outcome = match (verdict.action, target) {
            (ResolutionAction::Discard, Some(target)) => ResolutionOutcome::Discarded {
                duplicate_of: target.id.clone(),
            },
            (ResolutionAction::Supersede, Some(target)) => {
                let entity = self.store.add_entity(namespace_id, candidate).await?;
                self.remove_replaced(namespace_id, &target.id).await?;
                ResolutionOutcome::Superseded {
                    entity,
                    replaced_id: target.id.clone(),
                }
            }
            (ResolutionAction::Merge, Some(target)) => {
                let merged_content = verdict.merged_content.unwrap_or_default();
                let merged = merge_candidate(candidate, target, merged_content);
                let entity = self.store.add_entity(namespace_id, merged).await?;
                self.remove_replaced(namespace_id, &target.id).await?;
                ResolutionOutcome::Merged {
                    entity,
                    replaced_id: target.id.clone(),
                }
            }
            _ => return self.insert(namespace_id, candidate).await,
        };

        info!(
            action = %outcome.action(),
            stored = ?outcome.stored().map(|e| e.id.as_str()),
            "Applied verdict"
        );
        counter!("resolution.verdicts", "action" => outcome.action().to_string()).increment(1);
        Ok(outcome)
    }

    async fn insert(
        &self,
        namespace_id: &str,
        candidate: NewEntity,
    ) -> StoreResult<ResolutionOutcome> {
        let entity = self.store.add_entity(namespace_id, candidate).await?;
        debug!(entity_id = %entity.id, "Inserted entity");
        counter!("resolution.verdicts", "action" => ResolutionAction::Insert.to_string())
            .increment(1);
        Ok(ResolutionOutcome::Inserted { entity })
    }

    /// Deletes the entity a merge or supersede replaced. It may already be
    /// gone if another writer removed it after the search.
    async fn remove_replaced(&self, namespace_id: &str, entity_id: &str) -> StoreResult<()> {
        match self.store.delete_entity(namespace_id, entity_id).await {
            Err(e) if e.is_not_found() => {
                warn!(entity_id, "Replaced entity already deleted");
                Ok(())
            }
            other => other,
        }
    }
}

fn check_verdict(verdict: &Verdict, neighbours: &[Entity]) -> Result<(), ResolutionError> {
    if matches!(
        verdict.action,
        ResolutionAction::Insert | ResolutionAction::Discard
    ) {
        return Ok(());
    }

    let Some(target_id) = verdict.target_id.as_deref() else {
        return Err(ResolutionError::invalid_verdict(format!(
            "{} verdict without target_id",
            verdict.action
        )));
    };
    if !neighbours.iter().any(|e| e.id == target_id) {
        return Err(ResolutionError::invalid_verdict(format!(
            "target_id `{target_id}` is not among the presented entities"
        )));
    }
    if verdict.action == ResolutionAction::Merge
        && verdict
            .merged_content
            .as_deref()
            .is_none_or(|c| c.trim().is_empty())
    {
        return Err(ResolutionError::invalid_verdict(
            "merge verdict without merged_content",
        ));
    }
    Ok(())
}

/// The replacement entity for a merge: merged content, with the candidate's
/// metadata layered over the target's.
fn merge_candidate(candidate: NewEntity, target: &Entity, merged_content: String) -> NewEntity {
    let mut metadata = target.metadata();
    metadata.extend(candidate.metadata());

    match NewEntity::new(candidate.kind.clone(), merged_content.clone(), metadata) {
        Ok(merged) => merged,
        Err(e) => {
            warn!(error = %e, "Merged metadata rejected, keeping candidate metadata");
            NewEntity {
                content: merged_content,
                ..candidate
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mk_core::types::{EntityKind, EntityPayload, GuidelinePayload};

    fn guideline(id: &str, content: &str, payload: GuidelinePayload) -> Entity {
        Entity {
            id: id.to_string(),
            namespace_id: "demo".to_string(),
            kind: EntityKind::Guideline,
            content: content.to_string(),
            payload: EntityPayload::Guideline(payload),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_check_verdict() {
        let neighbours = vec![guideline("1", "Use km", GuidelinePayload::default())];

        assert!(check_verdict(&Verdict::insert(), &[]).is_ok());
        assert!(check_verdict(&Verdict::discard("1"), &neighbours).is_ok());
        assert!(check_verdict(&Verdict::discard("2"), &neighbours).is_ok());
        assert!(check_verdict(&Verdict::merge("1", "Use km, not miles"), &neighbours).is_ok());

        let rejected = [
            Verdict::supersede("2"),
            Verdict::merge("1", "  "),
            Verdict {
                action: ResolutionAction::Supersede,
                merged_content: None,
                target_id: None,
            },
        ];
        for verdict in rejected {
            assert!(
                matches!(
                    check_verdict(&verdict, &neighbours),
                    Err(ResolutionError::InvalidVerdict { .. })
                ),
                "{verdict:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_merge_layers_candidate_metadata_over_target() {
        let target = guideline(
            "1",
            "Use km",
            GuidelinePayload {
                rationale: Some("metric country".to_string()),
                trigger: Some("Canada".to_string()),
                ..Default::default()
            },
        );
        let candidate = NewEntity::guideline(
            "Use kilometres",
            GuidelinePayload {
                trigger: Some("Canada distances".to_string()),
                ..Default::default()
            },
        );

        let merged =
            merge_candidate(candidate, &target, "Use km for Canada distances".to_string());
        assert_eq!(merged.content, "Use km for Canada distances");
        let EntityPayload::Guideline(payload) = merged.payload else {
            panic!("expected guideline payload");
        };
        assert_eq!(payload.rationale.as_deref(), Some("metric country"));
        assert_eq!(payload.trigger.as_deref(), Some("Canada distances"));
    }

    #[test]
    fn test_outcome_reports_stored_entity() {
        let entity = guideline("3", "x", GuidelinePayload::default());
        let outcome = ResolutionOutcome::Merged {
            entity: entity.clone(),
            replaced_id: "1".to_string(),
        };
        assert_eq!(outcome.action(), ResolutionAction::Merge);
        assert_eq!(outcome.stored(), Some(&entity));

        let discarded = ResolutionOutcome::Discarded {
            duplicate_of: "1".to_string(),
        };
        assert!(discarded.stored().is_none());
    }
}
