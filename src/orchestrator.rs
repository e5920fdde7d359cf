//! The public-facing fetch orchestrator.
//!
//! [`FetchOrchestrator`] is the single logical owner of all pagination and
//! hydration state. Commands take `&mut self`; the async work they start runs
//! in spawned tasks that report back over an internal channel. Nothing is
//! applied until the owner calls [`FetchOrchestrator::process_next`] (or one
//! of its variants), so registry checks and state mutations are never
//! interleaved with completions.
//!
//! # Example
//!
//! ```ignore
//! let mut orchestrator = FetchOrchestrator::new(fetchers, OrchestratorOptions::default());
//! let mut states = orchestrator.subscribe_state();
//!
//! orchestrator.set_active_source(SourceId::from_query("mountains"));
//! orchestrator.fetch_next_page();
//! orchestrator.run_until_idle().await;
//!
//! orchestrator.request_images(&[0, 1, 2]);
//! orchestrator.run_until_idle().await;
//! ```

use crate::config::Config;
use crate::error::{CoreError, TransportError};
use crate::fetchers::Fetchers;
use crate::model::{
    HydrationEvent, ImageHandle, ImageSlot, OrchestratorState, PhotoRecord, PresentationItem,
    SourceId,
};
use crate::source::{
    ImageRequest, LikeRequest, PageOutcome, PagePolicy, PageRequest, PagedSource,
};
use futures::FutureExt;
use serde::Deserialize;
use std::panic::AssertUnwindSafe;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Capacity of the internal completion channel.
const COMPLETION_CHANNEL_CAPACITY: usize = 64;

/// What happens to the source being switched away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchPolicy {
    /// Cancel its in-flight work but keep its entries; re-activating the same
    /// identity resumes where it left off.
    #[default]
    Preserve,
    /// Cancel its in-flight work, clear its entries and zero its page counter.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub page_size: usize,
    pub page_policy: PagePolicy,
    pub switch_policy: SwitchPolicy,
    /// Buffer of each broadcast channel; slow subscribers past this lag.
    pub event_capacity: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            page_policy: PagePolicy::default(),
            switch_policy: SwitchPolicy::default(),
            event_capacity: 64,
        }
    }
}

impl From<&Config> for OrchestratorOptions {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            page_policy: PagePolicy {
                dedupe_trailing_count: config.dedupe_trailing_count,
                retry_same_page_on_failure: config.retry_same_page_on_failure,
            },
            switch_policy: config.switch_policy,
            event_capacity: config.event_capacity,
        }
    }
}

/// Result of a spawned unit of work, routed back to the owner.
#[derive(Debug)]
pub(crate) enum Completion {
    Page {
        generation: u64,
        page: usize,
        result: Result<Vec<PhotoRecord>, TransportError>,
    },
    Image {
        generation: u64,
        index: usize,
        result: Result<ImageHandle, TransportError>,
    },
    Like {
        generation: u64,
        index: usize,
        result: Result<PhotoRecord, TransportError>,
    },
}

/// What applying one completion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    PageLoaded { page: usize, appended: usize },
    PageFailed { page: usize },
    ImageHydrated { index: usize },
    ImageFailed { index: usize },
    LikeApplied { index: usize },
    LikeFailed { index: usize },
    /// The completion belonged to a cancelled or replaced source and was dropped.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveSlot {
    Feed,
    Search,
    Likes,
}

pub struct FetchOrchestrator {
    fetchers: Fetchers,
    options: OrchestratorOptions,
    active: ActiveSlot,
    feed: PagedSource,
    /// Holds the most recent search identity; replaced when the query changes.
    search: PagedSource,
    /// Holds the most recent liked-photos identity; replaced when the user changes.
    likes: PagedSource,
    state_tx: broadcast::Sender<OrchestratorState>,
    hydration_tx: broadcast::Sender<HydrationEvent>,
    item_tx: broadcast::Sender<PresentationItem>,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
}

impl FetchOrchestrator {
    pub fn new(fetchers: Fetchers, options: OrchestratorOptions) -> Self {
        let capacity = options.event_capacity.max(1);
        let (state_tx, _) = broadcast::channel(capacity);
        let (hydration_tx, _) = broadcast::channel(capacity);
        let (item_tx, _) = broadcast::channel(capacity);
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);

        Self {
            fetchers,
            options,
            active: ActiveSlot::Feed,
            feed: PagedSource::new(SourceId::Feed),
            search: PagedSource::new(SourceId::Search(String::new())),
            likes: PagedSource::new(SourceId::UserLikes(String::new())),
            state_tx,
            hydration_tx,
            item_tx,
            completion_tx,
            completion_rx,
        }
    }

    // ------------------------------------------------------------------------
    // Subscriptions and accessors
    // ------------------------------------------------------------------------

    /// Data-level transitions (`Loading`, `Loaded`, `Failed`) of the active source.
    pub fn subscribe_state(&self) -> broadcast::Receiver<OrchestratorState> {
        self.state_tx.subscribe()
    }

    /// Per-item hydration updates of the active source.
    ///
    /// The channel keeps the last `event_capacity` events. A subscriber that
    /// falls further behind gets `RecvError::Lagged` and misses the overwritten
    /// events; use the outcomes of [`Self::process_next`] to count exactly.
    pub fn subscribe_hydration(&self) -> broadcast::Receiver<HydrationEvent> {
        self.hydration_tx.subscribe()
    }

    /// Items whose like state changed after [`Self::set_liked`]. Lags like
    /// [`Self::subscribe_hydration`].
    pub fn subscribe_item_updates(&self) -> broadcast::Receiver<PresentationItem> {
        self.item_tx.subscribe()
    }

    pub fn active_source(&self) -> &SourceId {
        self.active_ref().id()
    }

    /// Number of entries accumulated by the active source.
    pub fn len(&self) -> usize {
        self.active_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_ref().is_empty()
    }

    pub fn current_page(&self) -> usize {
        self.active_ref().current_page()
    }

    /// Tasks in flight for the active source. Deactivated sources never have any.
    pub fn in_flight(&self) -> usize {
        self.active_ref().in_flight()
    }

    /// # Errors
    ///
    /// [`CoreError::IndexOutOfRange`] past the active source's entry count.
    pub fn presentation_item(&self, index: usize) -> Result<PresentationItem, CoreError> {
        self.active_ref().presentation_item(index)
    }

    /// # Errors
    ///
    /// [`CoreError::IndexOutOfRange`] past the active source's entry count.
    pub fn image_slot(&self, index: usize) -> Result<&ImageSlot, CoreError> {
        self.active_ref().image_slot(index)
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Makes `identity` the active source.
    ///
    /// Re-selecting the active identity is a no-op: pagination and entries are
    /// untouched. Otherwise the outgoing source is suspended or reset according
    /// to [`SwitchPolicy`]. A search with a new query, or the likes of a
    /// different user, starts fresh.
    pub fn set_active_source(&mut self, identity: SourceId) {
        if *self.active_source() == identity {
            tracing::debug!(source = %identity, "Source already active");
            return;
        }

        let previous = self.active_source().clone();
        let policy = self.options.switch_policy;
        let outgoing = self.active_mut();
        match policy {
            SwitchPolicy::Preserve => outgoing.suspend(),
            SwitchPolicy::Reset => outgoing.reset(),
        }

        self.active = match identity {
            SourceId::Feed => ActiveSlot::Feed,
            SourceId::Search(_) => {
                replace_if_changed(&mut self.search, identity);
                ActiveSlot::Search
            }
            SourceId::UserLikes(_) => {
                replace_if_changed(&mut self.likes, identity);
                ActiveSlot::Likes
            }
        };

        tracing::info!(
            from = %previous,
            to = %self.active_source(),
            policy = ?policy,
            entries = self.len(),
            "Switched active source"
        );
    }

    /// Switches to the identity for `query` (blank => feed), then requests its
    /// next page.
    pub fn fetch_for_query(&mut self, query: &str) -> Option<usize> {
        self.set_active_source(SourceId::from_query(query));
        self.fetch_next_page()
    }

    /// Requests the next page of the active source.
    ///
    /// Returns the page number launched, or `None` when a page fetch for this
    /// source is already in flight. Publishes `Loading` when a fetch starts.
    pub fn fetch_next_page(&mut self) -> Option<usize> {
        let page_size = self.options.page_size;
        let fetchers = self.fetchers.clone();
        let tx = self.completion_tx.clone();
        let source = self.active_mut();
        let identity = source.id().clone();

        let page = source.request_next_page(|request| {
            spawn_page_fetch(request, page_size, identity, fetchers, tx)
        })?;

        tracing::debug!(source = %self.active_source(), page, page_size, "Page fetch started");
        self.publish_state(OrchestratorState::Loading);
        Some(page)
    }

    /// Requests hydration for each index of the active source.
    ///
    /// Out-of-range, already hydrated and in-flight indices are skipped.
    /// Returns the number of fetches started.
    pub fn request_images(&mut self, indices: &[usize]) -> usize {
        let fetchers = self.fetchers.clone();
        let tx = self.completion_tx.clone();
        let source = self.active_mut();

        let started = indices
            .iter()
            .filter(|&&index| {
                source.request_image(index, |request| {
                    spawn_image_fetch(request, fetchers.clone(), tx.clone())
                })
            })
            .count();

        if started > 0 {
            tracing::debug!(requested = indices.len(), started, "Image hydration started");
        }
        started
    }

    /// Likes (`liked = true`) or unlikes the entry at `index` of the active
    /// source.
    ///
    /// Returns false when the index is out of range, the entry is already in
    /// that state, or a toggle for it is in flight. The updated item is
    /// published on [`Self::subscribe_item_updates`] once the server answers.
    pub fn set_liked(&mut self, index: usize, liked: bool) -> bool {
        let fetchers = self.fetchers.clone();
        let tx = self.completion_tx.clone();
        let started = self
            .active_mut()
            .request_like(index, liked, |request| spawn_like(request, fetchers, tx));
        if started {
            tracing::debug!(index, liked, "Like toggle started");
        }
        started
    }

    // ------------------------------------------------------------------------
    // Completion processing
    // ------------------------------------------------------------------------

    /// Waits for the next completion and applies it.
    pub async fn process_next(&mut self) -> CompletionOutcome {
        // The orchestrator holds a sender, so the channel never closes.
        match self.completion_rx.recv().await {
            Some(completion) => self.apply(completion),
            None => CompletionOutcome::Stale,
        }
    }

    /// Applies every completion already queued without waiting.
    ///
    /// Returns how many were applied.
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.apply(completion);
            applied += 1;
        }
        applied
    }

    /// Processes completions until the active source has nothing in flight.
    ///
    /// Returns the outcome of every completion applied, stale ones included.
    pub async fn run_until_idle(&mut self) -> Vec<CompletionOutcome> {
        let mut outcomes = Vec::new();
        while self.in_flight() > 0 {
            outcomes.push(self.process_next().await);
        }
        outcomes
    }

    fn apply(&mut self, completion: Completion) -> CompletionOutcome {
        match completion {
            Completion::Page {
                generation,
                page,
                result,
            } => {
                let policy = self.options.page_policy;
                let Some(source) = self.source_for_generation(generation) else {
                    tracing::debug!(generation, page, "Discarding stale page completion");
                    return CompletionOutcome::Stale;
                };

                match source.apply_page(page, result, policy) {
                    PageOutcome::Loaded(items) => {
                        let appended = items.len();
                        self.publish_state(OrchestratorState::Loaded(items));
                        CompletionOutcome::PageLoaded { page, appended }
                    }
                    PageOutcome::Failed(error) => {
                        self.publish_state(OrchestratorState::Failed(error));
                        CompletionOutcome::PageFailed { page }
                    }
                }
            }
            Completion::Image {
                generation,
                index,
                result,
            } => {
                let Some(source) = self.source_for_generation(generation) else {
                    tracing::debug!(generation, index, "Discarding stale image completion");
                    return CompletionOutcome::Stale;
                };

                match source.apply_image(index, result) {
                    Some(event) => {
                        if self.hydration_tx.send(event).is_err() {
                            tracing::trace!(index, "No hydration subscribers");
                        }
                        CompletionOutcome::ImageHydrated { index }
                    }
                    None => CompletionOutcome::ImageFailed { index },
                }
            }
            Completion::Like {
                generation,
                index,
                result,
            } => {
                let Some(source) = self.source_for_generation(generation) else {
                    tracing::debug!(generation, index, "Discarding stale like completion");
                    return CompletionOutcome::Stale;
                };

                match source.apply_like(index, result) {
                    Some(item) => {
                        if self.item_tx.send(item).is_err() {
                            tracing::trace!(index, "No item update subscribers");
                        }
                        CompletionOutcome::LikeApplied { index }
                    }
                    None => CompletionOutcome::LikeFailed { index },
                }
            }
        }
    }

    fn publish_state(&self, state: OrchestratorState) {
        if self.state_tx.send(state).is_err() {
            tracing::trace!("No state subscribers");
        }
    }

    /// Only the active source can match: switching bumps the outgoing
    /// source's generation.
    fn source_for_generation(&mut self, generation: u64) -> Option<&mut PagedSource> {
        let source = self.active_mut();
        (source.generation() == generation).then_some(source)
    }

    fn active_ref(&self) -> &PagedSource {
        match self.active {
            ActiveSlot::Feed => &self.feed,
            ActiveSlot::Search => &self.search,
            ActiveSlot::Likes => &self.likes,
        }
    }

    fn active_mut(&mut self) -> &mut PagedSource {
        match self.active {
            ActiveSlot::Feed => &mut self.feed,
            ActiveSlot::Search => &mut self.search,
            ActiveSlot::Likes => &mut self.likes,
        }
    }
}

/// Swaps in a fresh source when `slot` holds a different identity.
fn replace_if_changed(slot: &mut PagedSource, identity: SourceId) {
    if *slot.id() != identity {
        slot.reset();
        *slot = PagedSource::new(identity);
    }
}

// ============================================================================
// Task spawning
// ============================================================================

/// Runs `future` to completion, converting a panic into its message.
async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            }
        })
}

fn spawn_page_fetch(
    request: PageRequest,
    page_size: usize,
    identity: SourceId,
    fetchers: Fetchers,
    tx: mpsc::Sender<Completion>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let PageRequest { page, generation } = request;
        let fetch = async {
            match &identity {
                SourceId::Feed => fetchers.feed.fetch_page(page, page_size).await,
                SourceId::Search(query) => {
                    fetchers.search.search_page(page, page_size, query).await
                }
                SourceId::UserLikes(username) => {
                    fetchers
                        .likes
                        .fetch_liked_page(page, page_size, username)
                        .await
                }
            }
        };
        let result = catch_task_panic(fetch).await.unwrap_or_else(|panic_msg| {
            tracing::error!(task = "page_fetch", page, error = %panic_msg, "Background task panicked");
            Err(TransportError::Panicked(panic_msg))
        });

        if let Err(e) = tx
            .send(Completion::Page {
                generation,
                page,
                result,
            })
            .await
        {
            tracing::warn!(error = %e, event = "Page", "Channel send failed (receiver dropped)");
        }
    })
}

fn spawn_image_fetch(
    request: ImageRequest,
    fetchers: Fetchers,
    tx: mpsc::Sender<Completion>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ImageRequest {
            index,
            url,
            generation,
        } = request;
        let result = catch_task_panic(fetchers.images.fetch(&url))
            .await
            .unwrap_or_else(|panic_msg| {
                tracing::error!(task = "image_fetch", index, error = %panic_msg, "Background task panicked");
                Err(TransportError::Panicked(panic_msg))
            });

        if let Err(e) = tx
            .send(Completion::Image {
                generation,
                index,
                result,
            })
            .await
        {
            tracing::warn!(error = %e, event = "Image", "Channel send failed (receiver dropped)");
        }
    })
}

fn spawn_like(
    request: LikeRequest,
    fetchers: Fetchers,
    tx: mpsc::Sender<Completion>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let LikeRequest {
            index,
            photo_id,
            liked,
            generation,
        } = request;
        let write = async {
            if liked {
                fetchers.liker.like(&photo_id).await
            } else {
                fetchers.liker.unlike(&photo_id).await
            }
        };
        let result = catch_task_panic(write).await.unwrap_or_else(|panic_msg| {
            tracing::error!(task = "like", index, error = %panic_msg, "Background task panicked");
            Err(TransportError::Panicked(panic_msg))
        });

        if let Err(e) = tx
            .send(Completion::Like {
                generation,
                index,
                result,
            })
            .await
        {
            tracing::warn!(error = %e, event = "Like", "Channel send failed (receiver dropped)");
        }
    })
}
