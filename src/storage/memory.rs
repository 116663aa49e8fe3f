use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{next_revision, Aggregate, Repository};
use crate::errors::{Result, WorkflowError};

/// Repository held in process memory, used by tests and the `memory` backend
pub struct InMemoryRepository<T> {
    items: RwLock<BTreeMap<String, T>>,
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T: Aggregate> Repository<T> for InMemoryRepository<T> {
    async fn get(&self, key: &str) -> Result<Option<T>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<T>> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn save(&self, item: &T) -> Result<T> {
        let mut items = self.items.write().await;
        let key = item.key();
        let next = next_revision(items.get(&key), item)?;
        items.insert(key, next.clone());
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.items
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| WorkflowError::not_found(T::KIND, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::model::IssuedToken;
    use chrono::Utc;

    fn token(step: &str) -> IssuedToken {
        IssuedToken {
            operation_id: "op".into(),
            step_id: step.into(),
            value: "K7Q2M9XA".into(),
            issued_at: Utc::now(),
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let repo = InMemoryRepository::<IssuedToken>::new();
        let saved = repo.save(&token("s1")).await.unwrap();
        assert_eq!(saved.version, 1);

        let loaded = repo.require("op:s1").await.unwrap();
        assert_eq!(loaded.value, "K7Q2M9XA");
        assert_eq!(repo.list().await.unwrap().len(), 1);

        repo.delete("op:s1").await.unwrap();
        assert!(repo.get("op:s1").await.unwrap().is_none());
        assert_eq!(repo.delete("op:s1").await.unwrap_err().code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_second_writer_with_stale_copy_conflicts() {
        let repo = InMemoryRepository::<IssuedToken>::new();
        let first = repo.save(&token("s1")).await.unwrap();

        let mut tab_a = first.clone();
        let mut tab_b = first.clone();
        tab_a.value = "AAAAAAAA".into();
        tab_b.value = "BBBBBBBB".into();

        repo.save(&tab_a).await.unwrap();
        let err = repo.save(&tab_b).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(repo.require("op:s1").await.unwrap().value, "AAAAAAAA");
    }
}
