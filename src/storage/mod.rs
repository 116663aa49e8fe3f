//! Repositories for workflow definitions, operations and issued tokens
//!
//! Every aggregate carries a `version`. A save must present the version that
//! is currently stored; the repository bumps it and returns the stored copy.
//! A stale version is rejected with [`WorkflowError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{ModeConfig, StorageBackend, StorageConfig};
use crate::errors::{Result, WorkflowError};
use crate::workflows::model::{IssuedToken, OperationInstance, WorkflowDefinition};

pub mod fallback;
pub mod file;
pub mod http;
pub mod memory;

pub use fallback::FallbackRepository;
pub use file::FileRepository;
pub use http::HttpRepository;
pub use memory::InMemoryRepository;

/// A versioned record stored as one entry of a collection
pub trait Aggregate: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name, used for file names and REST paths
    const COLLECTION: &'static str;
    /// Name used in not-found errors
    const KIND: &'static str;

    fn key(&self) -> String;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
    fn touch(&mut self, _now: DateTime<Utc>) {}
}

impl Aggregate for WorkflowDefinition {
    const COLLECTION: &'static str = "workflows";
    const KIND: &'static str = "workflow";

    fn key(&self) -> String {
        self.id.clone()
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl Aggregate for OperationInstance {
    const COLLECTION: &'static str = "operations";
    const KIND: &'static str = "operation";

    fn key(&self) -> String {
        self.id.clone()
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl Aggregate for IssuedToken {
    const COLLECTION: &'static str = "tokens";
    const KIND: &'static str = "token";

    fn key(&self) -> String {
        IssuedToken::vault_key(&self.operation_id, &self.step_id)
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[async_trait]
pub trait Repository<T: Aggregate>: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<T>>;

    async fn list(&self) -> Result<Vec<T>>;

    /// Store `item`, returning the stored copy with its new version
    async fn save(&self, item: &T) -> Result<T>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn require(&self, key: &str) -> Result<T> {
        self.get(key)
            .await?
            .ok_or_else(|| WorkflowError::not_found(T::KIND, key))
    }
}

pub type WorkflowRepository = dyn Repository<WorkflowDefinition>;
pub type OperationRepository = dyn Repository<OperationInstance>;
pub type TokenVault = dyn Repository<IssuedToken>;

/// Apply the optimistic concurrency rule and produce the record to store.
pub(crate) fn next_revision<T: Aggregate>(stored: Option<&T>, incoming: &T) -> Result<T> {
    if let Some(stored) = stored {
        if stored.version() != incoming.version() {
            return Err(WorkflowError::Conflict {
                key: incoming.key(),
                expected: incoming.version(),
            });
        }
    }
    let mut next = incoming.clone();
    next.set_version(incoming.version() + 1);
    next.touch(Utc::now());
    Ok(next)
}

/// The three repositories the engine works against
#[derive(Clone)]
pub struct Repositories {
    pub workflows: Arc<WorkflowRepository>,
    pub operations: Arc<OperationRepository>,
    pub tokens: Arc<TokenVault>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            workflows: Arc::new(InMemoryRepository::new()),
            operations: Arc::new(InMemoryRepository::new()),
            tokens: Arc::new(InMemoryRepository::new()),
        }
    }

    pub fn file(dir: &std::path::Path) -> Self {
        Self {
            workflows: Arc::new(FileRepository::new(dir)),
            operations: Arc::new(FileRepository::new(dir)),
            tokens: Arc::new(FileRepository::new(dir)),
        }
    }

    /// Build the repositories selected by configuration.
    ///
    /// The HTTP backend is wrapped with a file fallback only when the mode
    /// allows mock data.
    pub fn from_config(storage: &StorageConfig, mode: &ModeConfig) -> Result<Self> {
        let repos = match storage.backend {
            StorageBackend::Memory => Self::in_memory(),
            StorageBackend::File => Self::file(&storage.data_dir),
            StorageBackend::Http => {
                let base_url = storage.api_base_url.as_deref().ok_or_else(|| {
                    WorkflowError::Validation("storage.api_base_url is required for the http backend".into())
                })?;
                let rps = storage.requests_per_second;
                let ttl = Duration::from_secs(storage.cache_ttl_seconds);
                let remote = Self {
                    workflows: Arc::new(HttpRepository::new(base_url, rps, ttl)?),
                    operations: Arc::new(HttpRepository::new(base_url, rps, ttl)?),
                    tokens: Arc::new(HttpRepository::new(base_url, rps, ttl)?),
                };
                if mode.fallback_allowed() {
                    let local = Self::file(&storage.data_dir);
                    Self {
                        workflows: Arc::new(FallbackRepository::new(remote.workflows, local.workflows)),
                        operations: Arc::new(FallbackRepository::new(remote.operations, local.operations)),
                        tokens: Arc::new(FallbackRepository::new(remote.tokens, local.tokens)),
                    }
                } else {
                    remote
                }
            }
        };

        info!(
            backend = ?storage.backend,
            fallback = mode.fallback_allowed(),
            "Repositories initialized"
        );
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::model::OperationStatus;
    use std::collections::BTreeSet;

    fn operation(version: u64) -> OperationInstance {
        let now = Utc::now();
        OperationInstance {
            id: "op-1".into(),
            workflow_id: "wf-1".into(),
            current_step: "s1".into(),
            status: OperationStatus::InProgress,
            validated_tokens: BTreeSet::new(),
            step_history: vec![],
            version,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_next_revision_bumps_version() {
        let stored = operation(2);
        let next = next_revision(Some(&stored), &operation(2)).unwrap();
        assert_eq!(next.version, 3);

        let fresh = next_revision::<OperationInstance>(None, &operation(0)).unwrap();
        assert_eq!(fresh.version, 1);
    }

    #[test]
    fn test_next_revision_rejects_stale() {
        let stored = operation(5);
        let err = next_revision(Some(&stored), &operation(4)).unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[test]
    fn test_token_key_combines_operation_and_step() {
        let token = IssuedToken {
            operation_id: "op-1".into(),
            step_id: "s2".into(),
            value: "ABCD1234".into(),
            issued_at: Utc::now(),
            version: 0,
        };
        assert_eq!(token.key(), "op-1:s2");
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    fn storage(backend: StorageBackend, dir: &std::path::Path) -> StorageConfig {
        StorageConfig {
            backend,
            data_dir: dir.to_path_buf(),
            ..StorageConfig::default()
        }
    }

    #[tokio::test]
    async fn test_from_config_local_backends() {
        let dir = tempfile::TempDir::new().unwrap();
        let mode = ModeConfig::default();

        let memory = Repositories::from_config(&storage(StorageBackend::Memory, dir.path()), &mode).unwrap();
        memory.operations.save(&operation(0)).await.unwrap();
        assert!(!dir.path().join("operations.json").exists());

        let file = Repositories::from_config(&storage(StorageBackend::File, dir.path()), &mode).unwrap();
        file.operations.save(&operation(0)).await.unwrap();
        assert!(dir.path().join("operations.json").exists());
    }

    #[test]
    fn test_from_config_http_needs_a_url() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Repositories::from_config(&storage(StorageBackend::Http, dir.path()), &ModeConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_from_config_http_fallback_follows_mode() {
        let dir = tempfile::TempDir::new().unwrap();
        Repositories::file(dir.path())
            .operations
            .save(&operation(0))
            .await
            .unwrap();

        let mut config = storage(StorageBackend::Http, dir.path());
        config.api_base_url = Some(closed_port_url());

        // Development mode reads the local copy when the backend is down
        let dev = Repositories::from_config(&config, &ModeConfig::default()).unwrap();
        let local = dev.operations.list().await.unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, "op-1");

        // Production talks to the backend only
        let production = ModeConfig {
            production_mode: true,
            allow_mocks: true,
        };
        let prod = Repositories::from_config(&config, &production).unwrap();
        let err = prod.operations.list().await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }
}
