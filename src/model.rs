//! Domain records, per-entry image slots and the published projections.
use crate::error::TransportError;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Records
// ============================================================================

/// Image URLs attached to a photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUrls {
    /// Thumbnail-sized rendition, used for hydration.
    pub small: String,
    pub full: String,
}

/// Immutable photo record produced by the data collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    pub id: String,
    pub urls: PhotoUrls,
    pub likes: u32,
    pub liked_by_user: bool,
    pub created_at: DateTime<Utc>,
    /// Free-text description; empty when the upstream value was null.
    pub description: String,
}

/// Encoded image bytes returned by an [`ImageFetcher`](crate::fetchers::ImageFetcher).
///
/// Cloning is O(1). Decoding is left to the presentation layer.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageHandle(Arc<[u8]>);

impl ImageHandle {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Mutable image state of one entry. `image` is filled at most once.
#[derive(Debug, Clone)]
pub struct ImageSlot {
    pub id: String,
    pub image: Option<ImageHandle>,
}

/// One accumulated record plus its (possibly unfilled) image slot.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub record: PhotoRecord,
    pub image_slot: ImageSlot,
}

impl ListEntry {
    pub fn new(record: PhotoRecord) -> Self {
        let image_slot = ImageSlot {
            id: record.id.clone(),
            image: None,
        };
        Self { record, image_slot }
    }
}

// ============================================================================
// Source identity
// ============================================================================

/// Which logical data origin is active.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    Feed,
    Search(String),
    /// Photos liked by the named user.
    UserLikes(String),
}

impl SourceId {
    /// Maps a user query to a source; blank queries select the feed.
    pub fn from_query(query: &str) -> Self {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            SourceId::Feed
        } else {
            SourceId::Search(trimmed.to_string())
        }
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            SourceId::Search(query) => Some(query),
            SourceId::Feed | SourceId::UserLikes(_) => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            SourceId::UserLikes(username) => Some(username),
            SourceId::Feed | SourceId::Search(_) => None,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Feed => write!(f, "feed"),
            SourceId::Search(query) => write!(f, "search({query})"),
            SourceId::UserLikes(username) => write!(f, "likes({username})"),
        }
    }
}

// ============================================================================
// Published projections
// ============================================================================

/// Read-only projection of a [`ListEntry`] for display. Never carries image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationItem {
    pub id: String,
    /// Position in the owning source's entry sequence.
    pub position: usize,
    pub likes: u32,
    pub liked_by_user: bool,
    pub created_at: String,
    pub description: String,
}

impl PresentationItem {
    pub fn project(entry: &ListEntry, position: usize) -> Self {
        let record = &entry.record;
        Self {
            id: record.id.clone(),
            position,
            likes: record.likes,
            liked_by_user: record.liked_by_user,
            created_at: format_display_date(&record.created_at.with_timezone(&Local)),
            description: record.description.clone(),
        }
    }
}

/// Data-level transitions of the active source.
#[derive(Debug, Clone)]
pub enum OrchestratorState {
    Loading,
    /// Items appended by the page that just completed.
    Loaded(Vec<PresentationItem>),
    Failed(Arc<TransportError>),
}

/// A single entry whose image slot was just filled.
#[derive(Debug, Clone)]
pub struct HydrationEvent {
    pub item: PresentationItem,
    pub image: ImageHandle,
}

/// Formats a timestamp as e.g. `Oct 19, 2025 at 4:05 PM`.
pub fn format_display_date<Tz>(date: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    date.format("%b %-d, %Y at %-I:%M %p").to_string()
}
