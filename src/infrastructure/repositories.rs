//! Storage medium implementations

use crate::core::error::ChatError;
use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::StorageEntry;
use crate::infrastructure::traits::KeyValueStorage;
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use log::{debug, error};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::OnceCell;

fn storage_error(e: impl std::fmt::Display) -> ChatError {
    error!("{e}");
    ChatError::Storage(e.to_string())
}

/// Key-value storage in a single SQLite table.
pub struct SqliteStorage {
    connection: Ref<DatabaseConnection>,
    migrated: OnceCell<()>,
}

#[injectable(KeyValueStorage)]
impl SqliteStorage {
    #[inject]
    pub fn create(connection: Ref<DatabaseConnection>) -> SqliteStorage {
        SqliteStorage {
            connection,
            migrated: OnceCell::new(),
        }
    }
}

impl SqliteStorage {
    pub fn from_pool(pool: SqlitePool) -> SqliteStorage {
        SqliteStorage {
            connection: Ref::new(DatabaseConnection::from_pool(pool)),
            migrated: OnceCell::new(),
        }
    }

    /// Returns the pool, applying migrations the first time it's used.
    async fn pool(&self) -> Result<&SqlitePool, ChatError> {
        self.migrated
            .get_or_try_init(|| async {
                debug!("applying storage migrations");
                sqlx::migrate!()
                    .run(&**self.connection)
                    .await
                    .map_err(storage_error)
            })
            .await?;
        Ok(&**self.connection)
    }
}

#[async_trait]
impl KeyValueStorage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        let entry: Option<StorageEntry> =
            sqlx::query_as("SELECT key, value FROM storage WHERE key = ?")
                .bind(key)
                .fetch_optional(self.pool().await?)
                .await
                .map_err(storage_error)?;

        Ok(entry.map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        sqlx::query(
            "INSERT INTO storage (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool().await?)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ChatError> {
        sqlx::query("DELETE FROM storage WHERE key = ?")
            .bind(key)
            .execute(self.pool().await?)
            .await
            .map_err(storage_error)?;

        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, ChatError> {
        let keys: Vec<(String,)> = sqlx::query_as("SELECT key FROM storage")
            .fetch_all(self.pool().await?)
            .await
            .map_err(storage_error)?;

        Ok(keys.into_iter().map(|(key,)| key).collect())
    }
}

/// Process-local storage. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

#[injectable(KeyValueStorage)]
impl MemoryStorage {
    #[inject]
    pub fn create() -> MemoryStorage {
        MemoryStorage::default()
    }
}

impl MemoryStorage {
    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        self.entries().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ChatError> {
        self.entries().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, ChatError> {
        Ok(self.entries().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_set_get_remove() {
        let storage = MemoryStorage::default();

        assert_eq!(storage.get("a").await.unwrap(), None);
        storage.set("a", "1").await.unwrap();
        storage.set("a", "2").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some("2".to_owned()));

        storage.remove("a").await.unwrap();
        storage.remove("a").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_storage_keys() {
        let storage = MemoryStorage::default();
        storage.set("ollama.chat.1", "{}").await.unwrap();
        storage.set("theme", "dark").await.unwrap();

        let mut keys = storage.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["ollama.chat.1".to_owned(), "theme".to_owned()]);
    }
}
