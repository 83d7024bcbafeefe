//! SQLite namespace registry.
//!
//! Vector engines have no notion of namespace creation time or existence
//! separate from their collections, so the indexed backend records every
//! namespace here.

use chrono::{DateTime, Utc};
use errors::{StoreError, StoreResult};
use mk_core::types::Namespace;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

const BACKEND: &str = "registry";

pub struct NamespaceRegistry {
    pool: SqlitePool,
}

impl NamespaceRegistry {
    /// Connects to a SQLite database, creating the file if missing.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::backend(BACKEND, e))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?;

        let registry = Self { pool };
        registry.initialize_schema().await?;
        Ok(registry)
    }

    /// A private in-process registry. A single connection that never expires
    /// keeps the in-memory database alive for the pool's lifetime.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?;

        let registry = Self { pool };
        registry.initialize_schema().await?;
        Ok(registry)
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS namespaces (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::backend(BACKEND, e))?;
        Ok(())
    }

    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?;
        Ok(())
    }

    /// Registers a namespace, failing with `AlreadyExists` if the id is taken.
    pub async fn insert(&self, id: &str) -> StoreResult<Namespace> {
        let created_at = Utc::now();
        let result = sqlx::query("INSERT OR IGNORE INTO namespaces (id, created_at) VALUES (?, ?)")
            .bind(id)
            .bind(created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::already_exists(id));
        }
        Ok(Namespace {
            id: id.to_string(),
            created_at,
        })
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<Namespace>> {
        let row = sqlx::query("SELECT id, created_at FROM namespaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?;

        row.map(|r| namespace_from_row(&r)).transpose()
    }

    /// Removes a namespace. Returns `false` if it was not registered.
    pub async fn remove(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM namespaces WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self) -> StoreResult<Vec<Namespace>> {
        let rows = sqlx::query("SELECT id, created_at FROM namespaces ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::backend(BACKEND, e))?;

        rows.iter().map(namespace_from_row).collect()
    }
}

fn namespace_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Namespace> {
    let id: String = row
        .try_get("id")
        .map_err(|e| StoreError::backend(BACKEND, e))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| StoreError::backend(BACKEND, e))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::backend(BACKEND, e))?
        .with_timezone(&Utc);
    Ok(Namespace { id, created_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = NamespaceRegistry::in_memory().await.unwrap();
        let ns = registry.insert("demo").await.unwrap();
        assert_eq!(ns.id, "demo");

        let fetched = registry.get("demo").await.unwrap().unwrap();
        assert_eq!(fetched.id, "demo");
        assert_eq!(fetched.created_at.timestamp(), ns.created_at.timestamp());

        assert!(registry.remove("demo").await.unwrap());
        assert!(!registry.remove("demo").await.unwrap());
        assert!(registry.get("demo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let registry = NamespaceRegistry::in_memory().await.unwrap();
        registry.insert("demo").await.unwrap();
        let err = registry.insert("demo").await.unwrap_err();
        assert_eq!(err, StoreError::already_exists("demo"));
    }

    #[tokio::test]
    async fn test_list_and_ping() {
        let registry = NamespaceRegistry::in_memory().await.unwrap();
        registry.ping().await.unwrap();
        registry.insert("a").await.unwrap();
        registry.insert("b").await.unwrap();
        let ids: Vec<_> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a".to_string()));
        assert!(ids.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn test_file_backed_registry_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("registry.db").display());
        {
            let registry = NamespaceRegistry::connect(&url).await.unwrap();
            registry.insert("kept").await.unwrap();
        }
        let registry = NamespaceRegistry::connect(&url).await.unwrap();
        assert!(registry.get("kept").await.unwrap().is_some());
    }
}
