use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::{Aggregate, Repository};
use crate::errors::Result;

/// Routes calls to a local repository when the primary cannot be reached.
///
/// Only transport failures fall through. A not-found, a conflict or a remote
/// error from the primary is returned as is.
pub struct FallbackRepository<T> {
    primary: Arc<dyn Repository<T>>,
    fallback: Arc<dyn Repository<T>>,
}

impl<T: Aggregate> FallbackRepository<T> {
    pub fn new(primary: Arc<dyn Repository<T>>, fallback: Arc<dyn Repository<T>>) -> Self {
        Self { primary, fallback }
    }
}

macro_rules! with_fallback {
    ($self:ident, $op:literal, $call:ident ( $($arg:expr),* )) => {
        match $self.primary.$call($($arg),*).await {
            Err(e) if e.is_transport() => {
                warn!(
                    collection = T::COLLECTION,
                    operation = $op,
                    error = %e,
                    "Primary repository unreachable, using local fallback"
                );
                $self.fallback.$call($($arg),*).await
            }
            other => other,
        }
    };
}

#[async_trait]
impl<T: Aggregate> Repository<T> for FallbackRepository<T> {
    async fn get(&self, key: &str) -> Result<Option<T>> {
        with_fallback!(self, "get", get(key))
    }

    async fn list(&self) -> Result<Vec<T>> {
        with_fallback!(self, "list", list())
    }

    async fn save(&self, item: &T) -> Result<T> {
        with_fallback!(self, "save", save(item))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        with_fallback!(self, "delete", delete(key))
    }
}
