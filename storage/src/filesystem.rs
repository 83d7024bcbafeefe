//! Non-indexed entity store: one JSON document per namespace.
//!
//! Every mutation reads the namespace file, changes it in memory and
//! atomically replaces it (temp file + rename). Writers to the same namespace
//! are serialized by a per-namespace async mutex; different namespaces never
//! contend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use errors::{StoreError, StoreResult};
use mk_core::traits::{EntityStore, HealthStatus};
use mk_core::types::{
    Entity, EntityKind, EntityPayload, EntityQuery, Metadata, Namespace, NamespaceSummary,
    NewEntity, SearchHit, StoreHealth, resolve_namespace_id, validate_namespace_id,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const BACKEND: &str = "filesystem";

/// Persisted layout of one namespace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamespaceDocument {
    id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    entities: Vec<StoredEntity>,
    #[serde(default = "first_id")]
    next_id: u64,
}

fn first_id() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntity {
    id: String,
    #[serde(rename = "type")]
    kind: EntityKind,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: Metadata,
}

impl NamespaceDocument {
    fn summary(&self) -> NamespaceSummary {
        NamespaceSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            entity_count: self.entities.len(),
        }
    }

    fn entity(&self, stored: &StoredEntity) -> Entity {
        let payload = EntityPayload::from_metadata(&stored.kind, stored.metadata.clone())
            .unwrap_or_else(|e| {
                warn!(
                    namespace = %self.id,
                    entity = %stored.id,
                    error = %e,
                    "Stored metadata does not match its type"
                );
                EntityPayload::Opaque(stored.metadata.clone())
            });
        Entity {
            id: stored.id.clone(),
            namespace_id: self.id.clone(),
            kind: stored.kind.clone(),
            content: stored.content.clone(),
            payload,
            created_at: stored.created_at,
        }
    }
}

/// Entity store persisting each namespace as `<data_dir>/<namespace>.json`.
pub struct FileEntityStore {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileEntityStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::backend(BACKEND, e))?;
        Ok(Self {
            root,
            locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, namespace_id: &str) -> PathBuf {
        self.root.join(format!("{namespace_id}.json"))
    }

    /// Lock serializing writers of one namespace. Callers validate the id
    /// first so that only real namespace ids get an entry.
    fn lock_for(&self, namespace_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(namespace_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the lock entry unless another task still holds or awaits it.
    fn release_lock(&self, namespace_id: &str, lock: &Arc<Mutex<()>>) {
        // One reference is the map's, one is the caller's.
        self.locks.remove_if(namespace_id, |_, held| {
            Arc::ptr_eq(held, lock) && Arc::strong_count(held) == 2
        });
    }

    async fn load(&self, namespace_id: &str) -> StoreResult<NamespaceDocument> {
        known_namespace_id(namespace_id)?;
        read_document(&self.path_for(namespace_id))
            .await?
            .ok_or_else(|| StoreError::namespace_not_found(namespace_id))
    }

    async fn save(&self, document: &NamespaceDocument) -> StoreResult<()> {
        let bytes =
            serde_json::to_vec_pretty(document).map_err(|e| StoreError::backend(BACKEND, e))?;
        let path = self.path_for(&document.id);
        let dir = self.root.clone();

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes, true))
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?
            .map_err(|e| StoreError::backend(BACKEND, e))
    }
}

/// Ids that fail validation cannot name a stored namespace.
fn known_namespace_id(namespace_id: &str) -> StoreResult<()> {
    validate_namespace_id(namespace_id).map_err(|_| StoreError::namespace_not_found(namespace_id))
}

async fn read_document(path: &Path) -> StoreResult<Option<NamespaceDocument>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::backend(BACKEND, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::backend(BACKEND, format!("{}: {e}", path.display())))
}

/// Writes `bytes` to a temp file in `dir` and renames it over `path`.
/// With `overwrite = false` the rename fails if `path` already exists.
fn write_atomic(dir: &Path, path: &Path, bytes: &[u8], overwrite: bool) -> std::io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if overwrite {
        tmp.persist(path).map_err(|e| e.error)?;
    } else {
        tmp.persist_noclobber(path).map_err(|e| e.error)?;
    }
    Ok(())
}

#[async_trait]
impl EntityStore for FileEntityStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn ready(&self) -> StoreHealth {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => StoreHealth {
                backend: BACKEND.to_string(),
                status: HealthStatus::Healthy,
                detail: None,
            },
            Ok(_) => StoreHealth {
                backend: BACKEND.to_string(),
                status: HealthStatus::Unhealthy,
                detail: Some(format!("{} is not a directory", self.root.display())),
            },
            Err(e) => StoreHealth {
                backend: BACKEND.to_string(),
                status: HealthStatus::Unhealthy,
                detail: Some(e.to_string()),
            },
        }
    }

    #[instrument(skip(self))]
    async fn create_namespace(&self, id: Option<&str>) -> StoreResult<Namespace> {
        let id = resolve_namespace_id(id)?;
        let lock = self.lock_for(&id);
        let _guard = lock.lock().await;

        let document = NamespaceDocument {
            id: id.clone(),
            created_at: Utc::now(),
            entities: Vec::new(),
            next_id: first_id(),
        };
        let bytes =
            serde_json::to_vec_pretty(&document).map_err(|e| StoreError::backend(BACKEND, e))?;
        let path = self.path_for(&id);
        let dir = self.root.clone();

        let written =
            tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes, false))
                .await
                .map_err(|e| StoreError::backend(BACKEND, e))?;
        match written {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::already_exists(id));
            }
            Err(e) => return Err(StoreError::backend(BACKEND, e)),
        }

        info!(namespace = %id, "Created namespace");
        Ok(Namespace {
            id,
            created_at: document.created_at,
        })
    }

    async fn get_namespace(&self, id: &str) -> StoreResult<NamespaceSummary> {
        Ok(self.load(id).await?.summary())
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, id: &str) -> StoreResult<()> {
        known_namespace_id(id)?;
        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let removed = match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => {
                info!(namespace = %id, "Deleted namespace");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::namespace_not_found(id))
            }
            Err(e) => Err(StoreError::backend(BACKEND, e)),
        };
        drop(guard);
        self.release_lock(id, &lock);
        removed
    }

    async fn list_namespaces(&self) -> StoreResult<Vec<NamespaceSummary>> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?;
        let mut summaries = Vec::new();

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_document(&path).await {
                Ok(Some(document)) => summaries.push(document.summary()),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable namespace file");
                }
            }
        }

        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }

    #[instrument(skip(self, entity), fields(kind = %entity.kind))]
    async fn add_entity(&self, namespace_id: &str, entity: NewEntity) -> StoreResult<Entity> {
        entity.validate()?;
        known_namespace_id(namespace_id)?;
        let lock = self.lock_for(namespace_id);
        let _guard = lock.lock().await;

        let mut document = self.load(namespace_id).await?;
        let stored = StoredEntity {
            id: document.next_id.to_string(),
            kind: entity.kind.clone(),
            content: entity.content.clone(),
            created_at: Utc::now(),
            metadata: entity.metadata(),
        };
        document.next_id += 1;
        document.entities.push(stored.clone());
        self.save(&document).await?;

        debug!(namespace = %namespace_id, entity = %stored.id, "Added entity");
        Ok(Entity {
            id: stored.id,
            namespace_id: namespace_id.to_string(),
            kind: entity.kind,
            content: entity.content,
            payload: entity.payload,
            created_at: stored.created_at,
        })
    }

    async fn get_entity(&self, namespace_id: &str, entity_id: &str) -> StoreResult<Entity> {
        let document = self.load(namespace_id).await?;
        document
            .entities
            .iter()
            .find(|e| e.id == entity_id)
            .map(|e| document.entity(e))
            .ok_or_else(|| StoreError::entity_not_found(namespace_id, entity_id))
    }

    #[instrument(skip(self))]
    async fn delete_entity(&self, namespace_id: &str, entity_id: &str) -> StoreResult<()> {
        known_namespace_id(namespace_id)?;
        let lock = self.lock_for(namespace_id);
        let _guard = lock.lock().await;

        let mut document = self.load(namespace_id).await?;
        let before = document.entities.len();
        document.entities.retain(|e| e.id != entity_id);
        if document.entities.len() == before {
            return Err(StoreError::entity_not_found(namespace_id, entity_id));
        }
        self.save(&document).await?;

        debug!(namespace = %namespace_id, entity = %entity_id, "Deleted entity");
        Ok(())
    }

    async fn list_entities(
        &self,
        namespace_id: &str,
        query: &EntityQuery,
    ) -> StoreResult<Vec<Entity>> {
        let document = self.load(namespace_id).await?;
        Ok(document
            .entities
            .iter()
            .map(|e| document.entity(e))
            .filter(|e| query.matches(e))
            .collect())
    }

    /// Case-insensitive substring match in insertion order. Every hit scores
    /// 1.0; this backend has no notion of partial relevance.
    async fn search_entities(
        &self,
        namespace_id: &str,
        text: &str,
        query: &EntityQuery,
        limit: usize,
    ) -> StoreResult<Vec<SearchHit>> {
        let document = self.load(namespace_id).await?;
        let needle = text.to_lowercase();

        Ok(document
            .entities
            .iter()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .map(|e| document.entity(e))
            .filter(|e| query.matches(e))
            .take(limit)
            .map(|entity| SearchHit { entity, score: 1.0 })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn store() -> (TempDir, FileEntityStore) {
        let dir = TempDir::new().unwrap();
        let store = FileEntityStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn note(content: &str) -> NewEntity {
        NewEntity::new("note", content, Metadata::new()).unwrap()
    }

    #[tokio::test]
    async fn test_persisted_layout() {
        let (dir, store) = store();
        store.create_namespace(Some("demo")).await.unwrap();
        store.add_entity("demo", note("first")).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("demo.json")).unwrap()).unwrap();
        assert_eq!(raw["id"], "demo");
        assert_eq!(raw["next_id"], 2);
        assert_eq!(raw["entities"][0]["id"], "1");
        assert_eq!(raw["entities"][0]["type"], "note");
        assert_eq!(raw["entities"][0]["content"], "first");
        assert!(raw["created_at"].is_string());
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_after_delete() {
        let (_dir, store) = store();
        store.create_namespace(Some("demo")).await.unwrap();
        let a = store.add_entity("demo", note("a")).await.unwrap();
        store.delete_entity("demo", &a.id).await.unwrap();
        let b = store.add_entity("demo", note("b")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.id, "2");
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_substring() {
        let (_dir, store) = store();
        store.create_namespace(Some("demo")).await.unwrap();
        store
            .add_entity("demo", note("Use KM for Canada distances"))
            .await
            .unwrap();
        store.add_entity("demo", note("Prefer miles in the US")).await.unwrap();

        let hits = store
            .search_entities("demo", "canada", &EntityQuery::all(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_lose_updates() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        store.create_namespace(Some("demo")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.add_entity("demo", note(&format!("entity {i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let summary = store.get_namespace("demo").await.unwrap();
        assert_eq!(summary.entity_count, 20);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unreadable_file_is_skipped_in_listing() {
        let (dir, store) = store();
        store.create_namespace(Some("good")).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();

        let namespaces = store.list_namespaces().await.unwrap();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].id, "good");
        assert!(logs_contain("Skipping unreadable namespace file"));

        let err = store.get_namespace("broken").await.unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_path_like_ids_are_rejected() {
        let (_dir, store) = store();
        let err = store.create_namespace(Some("../escape")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidEntity { .. }));
        let err = store.get_namespace("../escape").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_lock_entries_do_not_outlive_namespaces() {
        let (_dir, store) = store();
        assert!(store.add_entity("../escape", note("x")).await.unwrap_err().is_not_found());
        assert!(store.delete_entity("../escape", "1").await.unwrap_err().is_not_found());
        assert!(store.add_entity("missing", note("x")).await.unwrap_err().is_not_found());
        assert!(!store.locks.contains_key("../escape"));

        store.create_namespace(Some("demo")).await.unwrap();
        store.add_entity("demo", note("a")).await.unwrap();
        assert!(store.locks.contains_key("demo"));

        store.delete_namespace("demo").await.unwrap();
        assert!(!store.locks.contains_key("demo"));
        assert!(store.delete_namespace("missing").await.unwrap_err().is_not_found());
        assert!(!store.locks.contains_key("missing"));
    }

    #[tokio::test]
    async fn test_metadata_survives_reload() {
        let (dir, store) = store();
        store.create_namespace(Some("demo")).await.unwrap();
        let metadata = match json!({"trigger": "Canada distances", "category": "strategy"}) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        };
        let added = store
            .add_entity(
                "demo",
                NewEntity::new("guideline", "Use km", metadata.clone()).unwrap(),
            )
            .await
            .unwrap();

        let reopened = FileEntityStore::open(dir.path()).unwrap();
        let entity = reopened.get_entity("demo", &added.id).await.unwrap();
        assert_eq!(entity.metadata(), metadata);
        assert_eq!(entity, added);
    }
}
