//! Guideline consolidation: clusters guidelines learned on similar tasks and
//! asks the model to fold each cluster into fewer guidelines.

use crate::error::GenerationError;
use crate::generator::decode_guidelines;
use crate::llm::{CallPolicy, call_json};
use crate::prompts::{CONSOLIDATION_SYSTEM_PROMPT, consolidation_prompt};
use config::ConsolidationConfig;
use errors::StoreResult;
use mk_core::traits::{SharedEmbedder, SharedLlm, SharedStore};
use mk_core::types::{Entity, EntityKind, EntityQuery, NewEntity};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterFailure {
    pub entity_ids: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationReport {
    pub clusters_found: usize,
    pub clusters_consolidated: usize,
    pub guidelines_removed: usize,
    pub guidelines_added: usize,
    pub failures: Vec<ClusterFailure>,
}

pub struct Consolidator {
    store: SharedStore,
    embedder: SharedEmbedder,
    llm: SharedLlm,
    policy: CallPolicy,
    config: ConsolidationConfig,
}

impl Consolidator {
    pub fn new(
        store: SharedStore,
        embedder: SharedEmbedder,
        llm: SharedLlm,
        policy: CallPolicy,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            policy,
            config,
        }
    }

    #[instrument(skip(self), fields(namespace = %namespace_id))]
    pub async fn run(&self, namespace_id: &str) -> StoreResult<ConsolidationReport> {
        let mut candidates: Vec<(Entity, String)> = self
            .store
            .list_entities(namespace_id, &EntityQuery::of_kind(EntityKind::Guideline))
            .await?
            .into_iter()
            .filter_map(|e| {
                let task = e
                    .as_guideline()
                    .and_then(|p| p.task_description())
                    .map(str::trim)
                    .filter(|t| !t.is_empty())?
                    .to_string();
                Some((e, task))
            })
            .collect();

        let mut report = ConsolidationReport::default();
        if candidates.len() < 2 {
            return Ok(report);
        }
        if candidates.len() > self.config.max_entities {
            warn!(
                found = candidates.len(),
                max = self.config.max_entities,
                "Too many guidelines to cluster, truncating"
            );
            candidates.truncate(self.config.max_entities);
        }

        let descriptions: Vec<String> = candidates.iter().map(|(_, t)| t.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&descriptions)
            .await
            .map_err(|e| GenerationError::Embedding {
                reason: e.to_string(),
            })?;

        let clusters = cluster_by_similarity(&embeddings, self.config.clustering_threshold);
        report.clusters_found = clusters.len();

        for indices in clusters {
            let members: Vec<&(Entity, String)> =
                indices.iter().map(|&i| &candidates[i]).collect();
            self.consolidate_cluster(namespace_id, &members, &mut report)
                .await?;
        }

        info!(
            clusters = report.clusters_found,
            consolidated = report.clusters_consolidated,
            removed = report.guidelines_removed,
            added = report.guidelines_added,
            failed = report.failures.len(),
            "Consolidation complete"
        );
        Ok(report)
    }

    async fn consolidate_cluster(
        &self,
        namespace_id: &str,
        members: &[&(Entity, String)],
        report: &mut ConsolidationReport,
    ) -> StoreResult<()> {
        let entity_ids: Vec<String> = members.iter().map(|(e, _)| e.id.clone()).collect();
        let mut task_descriptions: Vec<String> = Vec::new();
        for (_, task) in members {
            if !task_descriptions.contains(task) {
                task_descriptions.push(task.clone());
            }
        }
        let entities: Vec<Entity> = members.iter().map(|(e, _)| e.clone()).collect();

        let prompt = consolidation_prompt(&task_descriptions, &entities);
        let combined = match call_json(
            &self.llm,
            self.policy,
            CONSOLIDATION_SYSTEM_PROMPT,
            &prompt,
            decode_guidelines,
        )
        .await
        {
            Ok(combined) if !combined.guidelines.is_empty() => combined,
            Ok(_) => {
                record_failure(report, entity_ids, "model returned no guidelines");
                return Ok(());
            }
            Err(e) => {
                record_failure(report, entity_ids, &GenerationError::from(e).to_string());
                return Ok(());
            }
        };

        let task_description = combined
            .task_description
            .clone()
            .or_else(|| task_descriptions.first().cloned())
            .unwrap_or_default();
        let sources = Value::from(entity_ids.clone());

        for draft in combined.guidelines {
            let (content, payload) = draft.into_payload();
            let payload = payload
                .with_extra("task_description", task_description.clone())
                .with_extra("creation_mode", "consolidated")
                .with_extra("consolidated_from", sources.clone());
            self.store
                .add_entity(namespace_id, NewEntity::guideline(content, payload))
                .await?;
            report.guidelines_added += 1;
        }

        for id in &entity_ids {
            match self.store.delete_entity(namespace_id, id).await {
                Ok(()) => report.guidelines_removed += 1,
                Err(e) if e.is_not_found() => warn!(entity_id = %id, "Guideline already deleted"),
                Err(e) => return Err(e),
            }
        }
        report.clusters_consolidated += 1;
        Ok(())
    }
}

fn record_failure(report: &mut ConsolidationReport, entity_ids: Vec<String>, reason: &str) {
    warn!(entities = ?entity_ids, reason, "Cluster left untouched");
    report.failures.push(ClusterFailure {
        entity_ids,
        reason: reason.to_string(),
    });
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Connected components of the graph linking every pair at or above
/// `threshold`. Singletons are dropped; clusters keep input order.
pub fn cluster_by_similarity(embeddings: &[Vec<f32>], threshold: f32) -> Vec<Vec<usize>> {
    let n = embeddings.len();
    let mut sets = UnionFind::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            if cosine(&embeddings[i], &embeddings[j]) >= threshold {
                sets.union(i, j);
            }
        }
    }

    let mut roots: Vec<usize> = Vec::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for i in 0..n {
        let root = sets.find(i);
        match roots.iter().position(|&r| r == root) {
            Some(pos) => clusters[pos].push(i),
            None => {
                roots.push(root);
                clusters.push(vec![i]);
            }
        }
    }
    clusters.retain(|c| c.len() > 1);
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_by_similarity_links_transitively() {
        // 0 and 3 are far apart but both close to 2.
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![-1.0, 0.0],
            vec![0.8, 0.6],
            vec![0.28, 0.96],
        ];
        let clusters = cluster_by_similarity(&embeddings, 0.75);
        assert_eq!(clusters, vec![vec![0, 2, 3]]);
    }

    #[test]
    fn test_cluster_by_similarity_edge_cases() {
        assert!(cluster_by_similarity(&[], 0.8).is_empty());
        assert!(cluster_by_similarity(&[vec![1.0]], 0.8).is_empty());
        assert!(cluster_by_similarity(&[vec![0.0, 0.0], vec![0.0, 0.0]], 0.8).is_empty());
        assert_eq!(
            cluster_by_similarity(&[vec![1.0, 0.0], vec![1.0, 0.0]], 1.0),
            vec![vec![0, 1]]
        );
    }
}
