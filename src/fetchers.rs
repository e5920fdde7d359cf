//! Collaborator capabilities the orchestrator depends on.
//!
//! Implementations live outside the core; [`crate::api`] provides HTTP
//! adapters, tests provide scripted in-memory ones.
use crate::error::TransportError;
use crate::model::{ImageHandle, PhotoRecord};
use std::sync::Arc;

/// Pages of the default feed.
#[async_trait::async_trait]
pub trait DataFetcher: Send + Sync {
    /// Fetch one page (1-based) of `per_page` records.
    async fn fetch_page(
        &self,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<PhotoRecord>, TransportError>;
}

/// Pages of query-filtered results.
#[async_trait::async_trait]
pub trait SearchFetcher: Send + Sync {
    async fn search_page(
        &self,
        page: usize,
        per_page: usize,
        query: &str,
    ) -> Result<Vec<PhotoRecord>, TransportError>;
}

/// Pages of the photos a user has liked.
#[async_trait::async_trait]
pub trait LikedPhotosFetcher: Send + Sync {
    async fn fetch_liked_page(
        &self,
        page: usize,
        per_page: usize,
        username: &str,
    ) -> Result<Vec<PhotoRecord>, TransportError>;
}

/// Like state writes. Both calls return the photo as the server now sees it.
#[async_trait::async_trait]
pub trait PhotoLiker: Send + Sync {
    async fn like(&self, photo_id: &str) -> Result<PhotoRecord, TransportError>;
    async fn unlike(&self, photo_id: &str) -> Result<PhotoRecord, TransportError>;
}

/// Image bytes by URL.
#[async_trait::async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ImageHandle, TransportError>;
}

/// The collaborators bundled for the orchestrator. Cloning is O(1).
#[derive(Clone)]
pub struct Fetchers {
    pub feed: Arc<dyn DataFetcher>,
    pub search: Arc<dyn SearchFetcher>,
    pub likes: Arc<dyn LikedPhotosFetcher>,
    pub liker: Arc<dyn PhotoLiker>,
    pub images: Arc<dyn ImageFetcher>,
}

impl Fetchers {
    pub fn new(
        feed: Arc<dyn DataFetcher>,
        search: Arc<dyn SearchFetcher>,
        likes: Arc<dyn LikedPhotosFetcher>,
        liker: Arc<dyn PhotoLiker>,
        images: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            feed,
            search,
            likes,
            liker,
            images,
        }
    }

    /// Uses one API client for every page source and for like writes.
    pub fn from_client<C>(client: Arc<C>, images: Arc<dyn ImageFetcher>) -> Self
    where
        C: DataFetcher + SearchFetcher + LikedPhotosFetcher + PhotoLiker + 'static,
    {
        Self {
            feed: client.clone(),
            search: client.clone(),
            likes: client.clone(),
            liker: client,
            images,
        }
    }
}
