//! Per-origin pagination state and entry accumulation.
//!
//! A [`PagedSource`] owns the append-only entry log of one [`SourceId`], its
//! page counter, and the registry of tasks working on its behalf. It never
//! spawns anything itself: callers pass a `launch` closure that starts the
//! async unit and returns its handle, and later feed the result back through
//! [`PagedSource::apply_page`] / [`PagedSource::apply_image`].
use crate::error::{CoreError, TransportError};
use crate::model::{
    HydrationEvent, ImageHandle, ImageSlot, ListEntry, PhotoRecord, PresentationItem, SourceId,
};
use crate::registry::{TaskKey, TaskRegistry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Process-wide generation counter. Every source epoch gets a fresh value so a
/// completion can never be mistaken for work of a later epoch.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskGroup {
    PageFetch,
    ImageHydrate,
    LikeToggle,
}

/// Page number for [`TaskGroup::PageFetch`], entry index for the other groups.
pub type SourceTaskKey = TaskKey<TaskGroup, usize>;

/// Parameters handed to the page-fetch launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub generation: u64,
}

/// Parameters handed to the image-fetch launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub index: usize,
    pub url: String,
    pub generation: u64,
}

/// Parameters handed to the like/unlike launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeRequest {
    pub index: usize,
    pub photo_id: String,
    /// Target state: true likes, false unlikes.
    pub liked: bool,
    pub generation: u64,
}

/// How a completed page fetch changed the source.
#[derive(Debug, Clone)]
pub enum PageOutcome {
    /// Items appended by this page, positions continuing from the previous tail.
    Loaded(Vec<PresentationItem>),
    Failed(Arc<TransportError>),
}

/// Tuning applied when a page lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePolicy {
    /// Trailing records dropped from every batch (upstream duplicate quirk).
    pub dedupe_trailing_count: usize,
    /// Roll the page counter back after a failure so a retry re-requests it.
    pub retry_same_page_on_failure: bool,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            dedupe_trailing_count: 3,
            retry_same_page_on_failure: false,
        }
    }
}

/// Drops the last `count` records of a batch.
pub fn clip_trailing(mut batch: Vec<PhotoRecord>, count: usize) -> Vec<PhotoRecord> {
    let keep = batch.len().saturating_sub(count);
    batch.truncate(keep);
    batch
}

pub struct PagedSource {
    id: SourceId,
    entries: Vec<ListEntry>,
    current_page: usize,
    generation: u64,
    tasks: TaskRegistry<TaskGroup, usize>,
}

impl PagedSource {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            entries: Vec::new(),
            current_page: 0,
            generation: next_generation(),
            tasks: TaskRegistry::new(),
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Last page whose fetch was launched (0 before the first fetch).
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of tasks currently in flight for this source.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn page_in_flight(&self) -> Option<usize> {
        self.tasks
            .keys()
            .filter(|key| key.group == TaskGroup::PageFetch)
            .map(|key| key.identity)
            .min()
    }

    pub fn entry(&self, index: usize) -> Result<&ListEntry, CoreError> {
        self.entries.get(index).ok_or(CoreError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })
    }

    pub fn presentation_item(&self, index: usize) -> Result<PresentationItem, CoreError> {
        self.entry(index)
            .map(|entry| PresentationItem::project(entry, index))
    }

    pub fn image_slot(&self, index: usize) -> Result<&ImageSlot, CoreError> {
        self.entry(index).map(|entry| &entry.image_slot)
    }

    /// Starts the fetch of the next page unless one is already in flight.
    ///
    /// The in-flight fetch is registered under the page number it requests, so a
    /// second call before it completes finds that key and returns `None`.
    /// Otherwise the counter advances and `launch` is invoked with the new page.
    pub fn request_next_page<F>(&mut self, launch: F) -> Option<usize>
    where
        F: FnOnce(PageRequest) -> JoinHandle<()>,
    {
        let in_flight = TaskKey::new(TaskGroup::PageFetch, self.current_page);
        if self.tasks.has(&in_flight) {
            tracing::debug!(
                source = %self.id,
                page = self.current_page,
                "Page fetch already in flight, skipping"
            );
            return None;
        }

        let page = self.current_page + 1;
        self.current_page = page;
        let handle = launch(PageRequest {
            page,
            generation: self.generation,
        });
        self.track(TaskKey::new(TaskGroup::PageFetch, page), handle);
        Some(page)
    }

    /// Applies a finished page fetch and releases its key.
    pub fn apply_page(
        &mut self,
        page: usize,
        result: Result<Vec<PhotoRecord>, TransportError>,
        policy: PagePolicy,
    ) -> PageOutcome {
        self.tasks.remove(&TaskKey::new(TaskGroup::PageFetch, page));

        match result {
            Ok(batch) => {
                let received = batch.len();
                let batch = clip_trailing(batch, policy.dedupe_trailing_count);
                let start = self.entries.len();
                self.entries.extend(batch.into_iter().map(ListEntry::new));

                let items: Vec<PresentationItem> = self.entries[start..]
                    .iter()
                    .enumerate()
                    .map(|(offset, entry)| PresentationItem::project(entry, start + offset))
                    .collect();

                tracing::info!(
                    source = %self.id,
                    page,
                    received,
                    appended = items.len(),
                    total = self.entries.len(),
                    "Page loaded"
                );
                PageOutcome::Loaded(items)
            }
            Err(e) => {
                tracing::warn!(source = %self.id, page, error = %e, "Page fetch failed");
                if policy.retry_same_page_on_failure && self.current_page == page {
                    self.current_page = page - 1;
                }
                PageOutcome::Failed(Arc::new(e))
            }
        }
    }

    /// Starts hydration of the entry at `index`.
    ///
    /// No-op (returns false) when the index is out of range, the slot is already
    /// filled, or a hydration for it is in flight.
    pub fn request_image<F>(&mut self, index: usize, launch: F) -> bool
    where
        F: FnOnce(ImageRequest) -> JoinHandle<()>,
    {
        let Some(entry) = self.entries.get(index) else {
            return false;
        };
        if entry.image_slot.image.is_some() {
            return false;
        }
        let key = TaskKey::new(TaskGroup::ImageHydrate, index);
        if self.tasks.has(&key) {
            return false;
        }

        let handle = launch(ImageRequest {
            index,
            url: entry.record.urls.small.clone(),
            generation: self.generation,
        });
        self.track(key, handle);
        true
    }

    /// Applies a finished hydration and releases its key.
    ///
    /// Failures are logged and leave the slot empty so a later pass can retry.
    pub fn apply_image(
        &mut self,
        index: usize,
        result: Result<ImageHandle, TransportError>,
    ) -> Option<HydrationEvent> {
        self.tasks.remove(&TaskKey::new(TaskGroup::ImageHydrate, index));

        let image = match result {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(source = %self.id, index, error = %e, "Image hydration failed");
                return None;
            }
        };

        let entry = self.entries.get_mut(index)?;
        entry.image_slot.image = Some(image.clone());
        tracing::debug!(source = %self.id, index, bytes = image.len(), "Image hydrated");
        Some(HydrationEvent {
            item: PresentationItem::project(entry, index),
            image,
        })
    }

    /// Starts a like (or unlike) of the entry at `index`.
    ///
    /// No-op (returns false) when the index is out of range, the entry is
    /// already in the requested state, or a toggle for it is in flight.
    pub fn request_like<F>(&mut self, index: usize, liked: bool, launch: F) -> bool
    where
        F: FnOnce(LikeRequest) -> JoinHandle<()>,
    {
        let Some(entry) = self.entries.get(index) else {
            return false;
        };
        if entry.record.liked_by_user == liked {
            return false;
        }
        let key = TaskKey::new(TaskGroup::LikeToggle, index);
        if self.tasks.has(&key) {
            return false;
        }

        let handle = launch(LikeRequest {
            index,
            photo_id: entry.record.id.clone(),
            liked,
            generation: self.generation,
        });
        self.track(key, handle);
        true
    }

    /// Applies a finished like toggle and releases its key.
    ///
    /// Only the like count and flag are taken from the returned record; a record
    /// for a different photo is ignored.
    pub fn apply_like(
        &mut self,
        index: usize,
        result: Result<PhotoRecord, TransportError>,
    ) -> Option<PresentationItem> {
        self.tasks.remove(&TaskKey::new(TaskGroup::LikeToggle, index));

        let updated = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(source = %self.id, index, error = %e, "Like toggle failed");
                return None;
            }
        };

        let entry = self.entries.get_mut(index)?;
        if entry.record.id != updated.id {
            tracing::warn!(
                source = %self.id,
                index,
                expected = %entry.record.id,
                received = %updated.id,
                "Like response for a different photo, ignoring"
            );
            return None;
        }
        entry.record = PhotoRecord {
            likes: updated.likes,
            liked_by_user: updated.liked_by_user,
            ..entry.record.clone()
        };
        tracing::debug!(source = %self.id, index, liked = updated.liked_by_user, "Like state updated");
        Some(PresentationItem::project(entry, index))
    }

    /// Cancels all in-flight work and starts a new epoch, keeping entries.
    ///
    /// An aborted page fetch is rolled back so the page is requested again.
    pub fn suspend(&mut self) {
        if let Some(page) = self.page_in_flight() {
            self.current_page = page - 1;
        }
        let cancelled = self.tasks.cancel_all();
        self.generation = next_generation();
        if cancelled > 0 {
            tracing::debug!(source = %self.id, cancelled, "Cancelled in-flight tasks");
        }
    }

    /// Cancels all in-flight work, clears entries and zeroes the page counter.
    pub fn reset(&mut self) {
        self.suspend();
        self.entries.clear();
        self.current_page = 0;
    }

    fn track(&mut self, key: SourceTaskKey, handle: JoinHandle<()>) {
        let registered = self.tasks.register(key, handle);
        if let Err(e) = &registered {
            tracing::error!(source = %self.id, error = %e, "Task registry invariant violated");
        }
        debug_assert!(registered.is_ok(), "duplicate task key {:?}", key);
    }
}
