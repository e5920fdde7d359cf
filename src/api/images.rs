use super::client::{get_bytes, RetryPolicy};
use crate::error::TransportError;
use crate::fetchers::ImageFetcher;
use crate::model::ImageHandle;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use url::Url;

/// Limit for a single image download.
const MAX_IMAGE_SIZE: usize = 20 * 1024 * 1024; // 20MB

/// Downloads image bytes. Image URLs are pre-signed, so no auth header is sent.
pub struct HttpImageFetcher {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpImageFetcher {
    pub fn new(http: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { http, retry }
    }
}

#[async_trait::async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<ImageHandle, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let build = || -> Result<reqwest::RequestBuilder, TransportError> {
            Ok(self.http.get(url.clone()))
        };

        let bytes = get_bytes(build, self.retry, MAX_IMAGE_SIZE).await?;
        tracing::debug!(url = %url, bytes = bytes.len(), "Image downloaded");
        Ok(ImageHandle::new(bytes))
    }
}

/// In-memory LRU cache in front of another [`ImageFetcher`], keyed by URL.
///
/// Concurrent misses for the same URL both hit the inner fetcher; the
/// orchestrator already dedupes requests per list position.
pub struct CachedImageFetcher<F> {
    inner: F,
    cache: Option<Mutex<LruCache<String, ImageHandle>>>,
}

impl<F: ImageFetcher> CachedImageFetcher<F> {
    /// A `capacity` of 0 disables caching.
    pub fn new(inner: F, capacity: usize) -> Self {
        Self {
            inner,
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .as_ref()
            .and_then(|cache| cache.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }

    fn lookup(&self, url: &str) -> Option<ImageHandle> {
        let cache = self.cache.as_ref()?;
        // A poisoned lock only means a panic mid-insert; treat as a miss.
        let mut cache = cache.lock().ok()?;
        cache.get(url).cloned()
    }

    fn store(&self, url: &str, image: &ImageHandle) {
        if let Some(cache) = &self.cache {
            if let Ok(mut cache) = cache.lock() {
                cache.put(url.to_string(), image.clone());
            }
        }
    }
}

#[async_trait::async_trait]
impl<F: ImageFetcher> ImageFetcher for CachedImageFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<ImageHandle, TransportError> {
        if let Some(hit) = self.lookup(url) {
            tracing::trace!(url, "Image cache hit");
            return Ok(hit);
        }

        let image = self.inner.fetch(url).await?;
        self.store(url, &image);
        Ok(image)
    }
}
