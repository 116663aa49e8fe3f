use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use reqwest::{header, StatusCode, Url};
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Aggregate, Repository};
use crate::errors::{Result, WorkflowError};

/// Repository talking to the REST backend.
///
/// Collections live under `{base_url}/{collection}`; saves send the version
/// the caller read in `If-Match` and the backend answers 409/412 when that
/// version is stale. Calls are rate limited, and reads by key are cached for
/// a short time and invalidated on every write through this handle.
pub struct HttpRepository<T> {
    client: reqwest::Client,
    base_url: Url,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    cache: Cache<String, T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Aggregate> HttpRepository<T> {
    pub fn new(base_url: &str, requests_per_second: u32, cache_ttl: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| WorkflowError::Validation(format!("invalid backend url: {base_url}")))?;
        let rps = NonZeroU32::new(requests_per_second).ok_or_else(|| {
            WorkflowError::Validation("requests_per_second must be greater than zero".into())
        })?;
        let quota = Quota::per_second(rps);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WorkflowError::Transport(e.to_string()))?;

        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(cache_ttl)
            .build();

        Ok(Self {
            client,
            base_url,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            cache,
            _marker: PhantomData,
        })
    }

    /// `{base_url}/{collection}` followed by `segments`, each escaped as a single segment
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(T::COLLECTION).extend(segments);
        }
        url
    }

    fn collection_url(&self) -> Url {
        self.url(&[])
    }

    fn item_url(&self, key: &str) -> Url {
        self.url(&[key])
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.rate_limiter.until_ready().await;
        request.send().await.map_err(|e| {
            warn!(collection = T::COLLECTION, error = %e, "Backend unreachable");
            WorkflowError::Transport(e.to_string())
        })
    }
}

async fn remote_error(response: reqwest::Response) -> WorkflowError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    WorkflowError::Remote { status, message }
}

#[async_trait]
impl<T: Aggregate> Repository<T> for HttpRepository<T> {
    async fn get(&self, key: &str) -> Result<Option<T>> {
        if let Some(cached) = self.cache.get(key).await {
            debug!(collection = T::COLLECTION, key = %key, "Cache hit");
            return Ok(Some(cached));
        }

        let response = self.send(self.client.get(self.item_url(key))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let item: T = response.json().await?;
                self.cache.insert(key.to_string(), item.clone()).await;
                Ok(Some(item))
            }
            _ => Err(remote_error(response).await),
        }
    }

    async fn list(&self) -> Result<Vec<T>> {
        let response = self.send(self.client.get(self.collection_url())).await?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn save(&self, item: &T) -> Result<T> {
        let key = item.key();
        let request = self
            .client
            .put(self.item_url(&key))
            .header(header::IF_MATCH, format!("\"{}\"", item.version()))
            .json(item);

        let response = self.send(request).await?;
        self.cache.invalidate(&key).await;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Err(WorkflowError::Conflict {
                key,
                expected: item.version(),
            }),
            status if status.is_success() => {
                let stored: T = response.json().await?;
                self.cache.insert(key, stored.clone()).await;
                Ok(stored)
            }
            _ => Err(remote_error(response).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.send(self.client.delete(self.item_url(key))).await?;
        self.cache.invalidate(key).await;

        match response.status() {
            StatusCode::NOT_FOUND => Err(WorkflowError::not_found(T::KIND, key)),
            status if status.is_success() => Ok(()),
            _ => Err(remote_error(response).await),
        }
    }
}
