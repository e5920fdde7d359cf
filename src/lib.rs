//! Paginated, deduplicated, cancellable photo feed orchestration.
//!
//! [`orchestrator::FetchOrchestrator`] owns one [`source::PagedSource`] per
//! data source, launches page and image fetches through the injected
//! [`fetchers::Fetchers`], and publishes state and hydration events over
//! broadcast channels. [`api`] holds the HTTP adapters.
pub mod api;
pub mod config;
pub mod error;
pub mod fetchers;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod source;

pub use error::{CoreError, TransportError};
pub use fetchers::{
    DataFetcher, Fetchers, ImageFetcher, LikedPhotosFetcher, PhotoLiker, SearchFetcher,
};
pub use model::{HydrationEvent, OrchestratorState, PresentationItem, SourceId};
pub use orchestrator::{FetchOrchestrator, OrchestratorOptions, SwitchPolicy};
