use errors::StoreResult;
use mk_core::traits::SharedStore;
use mk_core::types::{Entity, EntityKind, EntityQuery};
use std::fmt;
use tracing::instrument;

/// Guidelines relevant to a task, most relevant first.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskGuidelines {
    pub task: String,
    pub guidelines: Vec<Entity>,
}

impl TaskGuidelines {
    pub fn to_markdown(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TaskGuidelines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Guidelines for: {}", self.task)?;
        for (i, guideline) in self.guidelines.iter().enumerate() {
            write!(f, "\n{}. {}", i + 1, guideline.content)?;
        }
        Ok(())
    }
}

pub struct GuidelineRetriever {
    store: SharedStore,
}

impl GuidelineRetriever {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(namespace = %namespace_id))]
    pub async fn for_task(
        &self,
        namespace_id: &str,
        task: &str,
        limit: usize,
    ) -> StoreResult<TaskGuidelines> {
        let hits = self
            .store
            .search_entities(
                namespace_id,
                task,
                &EntityQuery::of_kind(EntityKind::Guideline),
                limit,
            )
            .await?;

        Ok(TaskGuidelines {
            task: task.to_string(),
            guidelines: hits.into_iter().map(|hit| hit.entity).collect(),
        })
    }
}
