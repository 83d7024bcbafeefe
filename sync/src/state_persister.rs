use crate::error::SyncError;
use crate::state::SyncState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[async_trait]
pub trait SyncStatePersister: Send + Sync {
    /// Loads the state stored under `key`, or a fresh state.
    async fn load(&self, key: &str) -> Result<SyncState, SyncError>;
    async fn save(&self, key: &str, state: &SyncState) -> Result<(), SyncError>;
}

/// One JSON file per key, replaced atomically on save.
pub struct FileStatePersister {
    dir: PathBuf,
}

impl FileStatePersister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn write_state(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl SyncStatePersister for FileStatePersister {
    async fn load(&self, key: &str) -> Result<SyncState, SyncError> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(SyncError::persistence),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncState::default()),
            Err(e) => Err(SyncError::persistence(e)),
        }
    }

    async fn save(&self, key: &str, state: &SyncState) -> Result<(), SyncError> {
        let bytes = serde_json::to_vec_pretty(state).map_err(SyncError::persistence)?;
        let dir = self.dir.clone();
        let path = self.path(key);
        tokio::task::spawn_blocking(move || write_state(&dir, &path, &bytes))
            .await
            .map_err(SyncError::persistence)?
            .map_err(SyncError::persistence)
    }
}

#[derive(Default)]
pub struct InMemoryStatePersister {
    states: RwLock<HashMap<String, SyncState>>,
}

impl InMemoryStatePersister {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStatePersister for InMemoryStatePersister {
    async fn load(&self, key: &str) -> Result<SyncState, SyncError> {
        Ok(self.states.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &str, state: &SyncState) -> Result<(), SyncError> {
        self.states
            .write()
            .await
            .insert(key.to_string(), state.clone());
        Ok(())
    }
}
