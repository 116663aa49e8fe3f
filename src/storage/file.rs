use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{next_revision, Aggregate, Repository};
use crate::errors::{Result, WorkflowError};

/// Repository backed by one JSON array file per collection.
///
/// Writers take an exclusive lock on `<collection>.lock` for the whole
/// read-check-write cycle, and the array is replaced through a temp file and
/// a rename so readers never see a half-written file.
pub struct FileRepository<T> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Aggregate> FileRepository<T> {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            _marker: PhantomData,
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", T::COLLECTION))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", T::COLLECTION))
    }

    async fn with_lock<R, F>(&self, exclusive: bool, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Path) -> Result<R> + Send + 'static,
    {
        let dir = self.dir.clone();
        let data_path = self.data_path();
        let lock_path = self.lock_path();

        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&dir)?;
            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            let mut lock = fd_lock::RwLock::new(lock_file);
            if exclusive {
                let _guard = lock.write()?;
                f(&data_path)
            } else {
                let _guard = lock.read()?;
                f(&data_path)
            }
        })
        .await
        .map_err(|e| WorkflowError::Io(std::io::Error::other(e)))?
    }
}

fn read_all<T: Aggregate>(path: &Path) -> Result<Vec<T>> {
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_all<T: Aggregate>(path: &Path, items: &[T]) -> Result<()> {
    let serialized = serde_json::to_vec_pretty(items)?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, serialized)?;
    fs::rename(&temp_path, path)?;
    debug!(file = ?path, entries = items.len(), "Collection written");
    Ok(())
}

#[async_trait]
impl<T: Aggregate> Repository<T> for FileRepository<T> {
    async fn get(&self, key: &str) -> Result<Option<T>> {
        let key = key.to_string();
        self.with_lock(false, move |path| {
            Ok(read_all::<T>(path)?.into_iter().find(|item| item.key() == key))
        })
        .await
    }

    async fn list(&self) -> Result<Vec<T>> {
        self.with_lock(false, |path| read_all::<T>(path)).await
    }

    async fn save(&self, item: &T) -> Result<T> {
        let item = item.clone();
        self.with_lock(true, move |path| {
            let mut items = read_all::<T>(path)?;
            let key = item.key();
            let position = items.iter().position(|existing| existing.key() == key);
            let next = next_revision(position.map(|i| &items[i]), &item)?;
            match position {
                Some(i) => items[i] = next.clone(),
                None => items.push(next.clone()),
            }
            write_all(path, &items)?;
            Ok(next)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_lock(true, move |path| {
            let mut items = read_all::<T>(path)?;
            let before = items.len();
            items.retain(|item| item.key() != key);
            if items.len() == before {
                return Err(WorkflowError::not_found(T::KIND, key));
            }
            write_all(path, &items)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::model::{Step, StepType, WorkflowDefinition, WorkflowType};
    use chrono::Utc;
    use tempfile::TempDir;

    fn workflow(id: &str) -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: id.into(),
            name: "Equipment leasing".into(),
            description: String::new(),
            workflow_type: WorkflowType::Leasing,
            steps: vec![Step::new("s1", StepType::Submission)],
            product_ids: vec!["lease-std".into()],
            active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_collection_is_a_json_array() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileRepository::<WorkflowDefinition>::new(temp_dir.path());

        repo.save(&workflow("wf-1")).await.unwrap();
        repo.save(&workflow("wf-2")).await.unwrap();

        let raw = std::fs::read_to_string(repo.data_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert!(raw.contains("\"workflow_type\": \"leasing\""));
    }

    #[tokio::test]
    async fn test_save_load_update() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileRepository::<WorkflowDefinition>::new(temp_dir.path());

        let saved = repo.save(&workflow("wf-1")).await.unwrap();
        assert_eq!(saved.version, 1);

        let mut edited = repo.require("wf-1").await.unwrap();
        edited.name = "Vehicle leasing".into();
        let saved = repo.save(&edited).await.unwrap();
        assert_eq!(saved.version, 2);

        // A fresh handle on the same directory sees the update
        let other = FileRepository::<WorkflowDefinition>::new(temp_dir.path());
        assert_eq!(other.require("wf-1").await.unwrap().name, "Vehicle leasing");
    }

    #[tokio::test]
    async fn test_stale_save_from_second_handle() {
        let temp_dir = TempDir::new().unwrap();
        let tab_a = FileRepository::<WorkflowDefinition>::new(temp_dir.path());
        let tab_b = FileRepository::<WorkflowDefinition>::new(temp_dir.path());

        let original = tab_a.save(&workflow("wf-1")).await.unwrap();
        let mut copy_a = original.clone();
        let mut copy_b = original;
        copy_a.name = "A".into();
        copy_b.name = "B".into();

        tab_a.save(&copy_a).await.unwrap();
        let err = tab_b.save(&copy_b).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_missing_file_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileRepository::<WorkflowDefinition>::new(temp_dir.path().join("nested"));

        assert!(repo.list().await.unwrap().is_empty());
        assert_eq!(repo.delete("nope").await.unwrap_err().code(), "NOT_FOUND");

        repo.save(&workflow("wf-1")).await.unwrap();
        repo.delete("wf-1").await.unwrap();
        assert!(repo.get("wf-1").await.unwrap().is_none());
    }
}
