//! FeedDetailController — episode list state for one mounted feed.
//!
//! Owns the episode collection and the page window exclusively.  Network
//! calls run as spawned tasks that post a `ControllerEvent` back on the
//! controller's channel; the owning loop hands each event to `handle`.
//! Every guard (fetch in flight, poll timer running) is read and written
//! synchronously here, never from the spawned tasks.
//!
//! # Polling
//! ```text
//!  Idle     — no timer; entered when no episode is PENDING/QUEUED/DOWNLOADING
//!  Polling  — repeating timer, each tick refreshes the active episodes
//! ```
//! The state is recomputed after every change to the collection.  A running
//! timer is never restarted by a recomputation.
//!
//! # Liveness
//! Each mount gets a fresh `generation`.  Completions and ticks carry the
//! generation they were issued under and are dropped if it no longer matches.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use pigeon_proto::api::{ApiError, EpisodeApi};
use pigeon_proto::config::FeedConfig;
use pigeon_proto::protocol::{Episode, EpisodePage, EpisodeStatusUpdate};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::scheduler::{Scheduler, TimerHandle};
use crate::sentinel::ScrollSentinel;

#[cfg(test)]
mod tests;

/// Pagination cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub current_page: u32,
    pub has_more: bool,
    /// Doubles as the in-flight guard for page fetches.
    pub is_loading: bool,
}

impl Default for PageWindow {
    fn default() -> Self {
        Self {
            current_page: 1,
            has_more: true,
            is_loading: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Delete,
    Retry,
}

/// User-facing outcome, rendered as a toast by the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Error(String),
}

/// Everything that re-enters the controller from outside `handle`'s caller.
#[derive(Debug)]
pub enum ControllerEvent {
    /// The last rendered episode became visible.
    SentinelVisible { generation: u64, arming: u64 },
    /// Poll timer fired.
    PollTick { generation: u64 },
    PageLoaded {
        generation: u64,
        page: u32,
        initial: bool,
        result: Result<EpisodePage, ApiError>,
    },
    StatusRefreshed {
        generation: u64,
        requested: Vec<String>,
        result: Result<Vec<EpisodeStatusUpdate>, ApiError>,
    },
    MutationFinished {
        generation: u64,
        kind: Mutation,
        id: String,
        result: Result<(), ApiError>,
    },
}

impl ControllerEvent {
    fn generation(&self) -> u64 {
        match self {
            Self::SentinelVisible { generation, .. }
            | Self::PollTick { generation }
            | Self::PageLoaded { generation, .. }
            | Self::StatusRefreshed { generation, .. }
            | Self::MutationFinished { generation, .. } => *generation,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::SentinelVisible { .. } => "sentinel",
            Self::PollTick { .. } => "poll-tick",
            Self::PageLoaded { .. } => "page-loaded",
            Self::StatusRefreshed { .. } => "status",
            Self::MutationFinished { .. } => "mutation",
        }
    }
}

pub struct FeedDetailController<A: EpisodeApi> {
    api: A,
    scheduler: Box<dyn Scheduler>,
    sentinel: Box<dyn ScrollSentinel>,
    events: mpsc::UnboundedSender<ControllerEvent>,
    page_size: u32,
    poll_interval: Duration,
    feed_id: Option<String>,
    generation: u64,
    /// Bumped on every sentinel re-arm; callbacks from older armings are ignored.
    arming: u64,
    episodes: Vec<Episode>,
    window: PageWindow,
    poll_timer: Option<TimerHandle>,
    /// A mutation succeeded while a page fetch was in flight; that fetch's
    /// result is discarded and page 1 is requested instead.
    reload_pending: bool,
    notices: Vec<Notice>,
}

impl<A: EpisodeApi> FeedDetailController<A> {
    pub fn new(
        api: A,
        scheduler: Box<dyn Scheduler>,
        sentinel: Box<dyn ScrollSentinel>,
        events: mpsc::UnboundedSender<ControllerEvent>,
        feed: &FeedConfig,
    ) -> Self {
        Self {
            api,
            scheduler,
            sentinel,
            events,
            page_size: feed.page_size.max(1),
            poll_interval: feed.poll_interval(),
            feed_id: None,
            generation: 0,
            arming: 0,
            episodes: Vec::new(),
            window: PageWindow::default(),
            poll_timer: None,
            reload_pending: false,
            notices: Vec::new(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Show `feed_id`, discarding whatever was mounted before.
    pub fn mount(&mut self, feed_id: impl Into<String>) {
        self.teardown();
        let feed_id = feed_id.into();
        info!("feed {}: mount (generation {})", feed_id, self.generation);
        self.feed_id = Some(feed_id);
        self.load_page(1, true);
    }

    pub fn unmount(&mut self) {
        if let Some(feed_id) = self.feed_id.take() {
            info!("feed {}: unmount", feed_id);
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.stop_polling();
        self.sentinel.detach();
        self.generation += 1;
        self.reload_pending = false;
        self.episodes.clear();
        self.window = PageWindow::default();
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn feed_id(&self) -> Option<&str> {
        self.feed_id.as_deref()
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn loading_episodes(&self) -> bool {
        self.window.is_loading
    }

    pub fn has_more_episodes(&self) -> bool {
        self.window.has_more
    }

    pub fn current_page(&self) -> u32 {
        self.window.current_page
    }

    pub fn window(&self) -> PageWindow {
        self.window
    }

    pub fn is_polling(&self) -> bool {
        self.poll_timer.is_some()
    }

    pub fn active_count(&self) -> usize {
        self.episodes.iter().filter(|e| e.is_active()).count()
    }

    /// Hand queued notices to the view.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Request one page.  Returns `false` without effect when nothing is
    /// mounted or a fetch is already in flight.
    pub fn load_page(&mut self, page: u32, initial: bool) -> bool {
        let Some(feed_id) = self.feed_id.clone() else {
            return false;
        };
        if self.window.is_loading {
            debug!("feed {}: page {} dropped, fetch in flight", feed_id, page);
            return false;
        }
        self.window.is_loading = true;

        let page = page.max(1);
        let size = self.page_size;
        let generation = self.generation;
        let api = self.api.clone();
        let tx = self.events.clone();
        debug!("feed {}: fetching page {} (initial={})", feed_id, page, initial);
        tokio::spawn(async move {
            let result = api.list_episodes(&feed_id, page, size).await;
            let _ = tx.send(ControllerEvent::PageLoaded {
                generation,
                page,
                initial,
                result,
            });
        });
        true
    }

    /// The last rendered episode scrolled into view.
    pub fn on_sentinel_visible(&mut self) -> bool {
        if !self.window.has_more || self.window.is_loading {
            trace!(
                "sentinel ignored (has_more={}, loading={})",
                self.window.has_more,
                self.window.is_loading
            );
            return false;
        }
        if self.feed_id.is_none() {
            return false;
        }
        self.window.current_page += 1;
        let page = self.window.current_page;
        self.load_page(page, false)
    }

    /// Ask the backend for the current status of every in-progress episode.
    /// Returns `false` (and sends nothing) when none are in progress.
    pub fn refresh_active_episodes(&mut self) -> bool {
        let ids: Vec<String> = self
            .episodes
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.id.clone())
            .collect();
        if ids.is_empty() {
            return false;
        }

        let generation = self.generation;
        let api = self.api.clone();
        let tx = self.events.clone();
        trace!("refreshing {} active episodes", ids.len());
        tokio::spawn(async move {
            let result = api.episode_status(&ids).await;
            let _ = tx.send(ControllerEvent::StatusRefreshed {
                generation,
                requested: ids,
                result,
            });
        });
        true
    }

    pub fn delete_episode(&mut self, id: &str) {
        self.mutate(Mutation::Delete, id);
    }

    pub fn retry_episode(&mut self, id: &str) {
        self.mutate(Mutation::Retry, id);
    }

    fn mutate(&mut self, kind: Mutation, id: &str) {
        if self.feed_id.is_none() {
            return;
        }
        info!("episode {}: {:?}", id, kind);
        let generation = self.generation;
        let api = self.api.clone();
        let tx = self.events.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let result = match kind {
                Mutation::Delete => api.delete_episode(&id).await,
                Mutation::Retry => api.retry_episode(&id).await,
            };
            let _ = tx.send(ControllerEvent::MutationFinished {
                generation,
                kind,
                id,
                result,
            });
        });
    }

    // ── Event dispatch ────────────────────────────────────────────────────────

    pub fn handle(&mut self, event: ControllerEvent) {
        if event.generation() != self.generation {
            debug!(
                "dropping stale {} event (generation {} != {})",
                event.kind(),
                event.generation(),
                self.generation
            );
            return;
        }

        match event {
            ControllerEvent::SentinelVisible { arming, .. } => {
                if arming == self.arming {
                    self.on_sentinel_visible();
                }
            }
            ControllerEvent::PollTick { .. } => {
                self.refresh_active_episodes();
            }
            ControllerEvent::PageLoaded {
                page,
                initial,
                result,
                ..
            } => self.on_page_loaded(page, initial, result),
            ControllerEvent::StatusRefreshed {
                requested, result, ..
            } => self.on_status_refreshed(&requested, result),
            ControllerEvent::MutationFinished {
                kind, id, result, ..
            } => self.on_mutation_finished(kind, &id, result),
        }
    }

    fn on_page_loaded(&mut self, page: u32, initial: bool, result: Result<EpisodePage, ApiError>) {
        self.window.is_loading = false;
        if self.reload_pending {
            debug!("page {} superseded by forced reload", page);
            self.reload_pending = false;
            self.rollback_page(page, initial);
            self.force_reload();
            return;
        }
        match result {
            Ok(data) => {
                let received = data.records.len();
                if initial {
                    self.episodes = data.records;
                    self.window.current_page = 1;
                } else {
                    self.episodes.extend(data.records);
                }
                self.window.has_more = page < data.pages;
                debug!(
                    "page {}/{}: {} episodes ({} total)",
                    page,
                    data.pages,
                    received,
                    self.episodes.len()
                );
                self.rearm_sentinel();
                self.recompute_polling();
            }
            Err(e) => {
                warn!("page {} failed: {}", page, e);
                self.rollback_page(page, initial);
                self.notices.push(Notice::Error(e.to_string()));
            }
        }
    }

    fn on_status_refreshed(
        &mut self,
        requested: &[String],
        result: Result<Vec<EpisodeStatusUpdate>, ApiError>,
    ) {
        match result {
            Ok(updates) => {
                let changed = merge_status_updates(&mut self.episodes, requested, &updates);
                if changed > 0 {
                    let finished = self
                        .episodes
                        .iter()
                        .filter(|e| requested.contains(&e.id))
                        .filter(|e| e.download_status.as_ref().is_some_and(|s| s.is_terminal()))
                        .count();
                    debug!(
                        "status refresh: {} episodes changed, {} finished",
                        changed, finished
                    );
                }
                self.recompute_polling();
            }
            Err(e) => warn!("status refresh failed: {}", e),
        }
    }

    fn on_mutation_finished(&mut self, kind: Mutation, id: &str, result: Result<(), ApiError>) {
        match result {
            Ok(()) => {
                let msg = match kind {
                    Mutation::Delete => "Episode deleted",
                    Mutation::Retry => "Episode resubmitted for download",
                };
                self.notices.push(Notice::Success(msg.to_string()));
                self.force_reload();
            }
            Err(e) => {
                warn!("episode {}: {:?} failed: {}", id, kind, e);
                let verb = match kind {
                    Mutation::Delete => "Delete",
                    Mutation::Retry => "Retry",
                };
                self.notices.push(Notice::Error(format!("{} failed: {}", verb, e)));
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Reload from the top instead of patching the list in place.  With a
    /// fetch in flight the reload waits for it to land.
    fn force_reload(&mut self) {
        if self.window.is_loading {
            self.reload_pending = true;
            return;
        }
        // current_page is reset when page 1 lands; a failed reload leaves
        // the window matching the list that is still shown.
        self.load_page(1, true);
    }

    /// Undo the advance for a scroll page that was never appended, so the
    /// next trigger asks for the same page again.
    fn rollback_page(&mut self, page: u32, initial: bool) {
        if !initial && page > 1 && self.window.current_page == page {
            self.window.current_page = page - 1;
        }
    }

    fn rearm_sentinel(&mut self) {
        self.sentinel.detach();
        self.arming += 1;
        if !self.window.has_more {
            return;
        }
        let tx = self.events.clone();
        let generation = self.generation;
        let arming = self.arming;
        self.sentinel.attach(Box::new(move || {
            let _ = tx.send(ControllerEvent::SentinelVisible { generation, arming });
        }));
    }

    fn recompute_polling(&mut self) {
        let active = self.active_count();
        match (active > 0, self.poll_timer) {
            (true, None) => {
                let tx = self.events.clone();
                let generation = self.generation;
                let handle = self.scheduler.schedule(
                    self.poll_interval,
                    Box::new(move || {
                        let _ = tx.send(ControllerEvent::PollTick { generation });
                    }),
                );
                info!(
                    "polling started: {} active episodes every {:?}",
                    active, self.poll_interval
                );
                self.poll_timer = Some(handle);
            }
            (false, Some(_)) => {
                info!("polling stopped: no active episodes");
                self.stop_polling();
            }
            _ => {}
        }
    }

    fn stop_polling(&mut self) {
        if let Some(handle) = self.poll_timer.take() {
            self.scheduler.cancel(handle);
        }
    }
}

/// Copy status fields from `updates` onto matching episodes.  Only ids in
/// `requested` are applied.  Returns how many episodes actually changed.
pub fn merge_status_updates(
    episodes: &mut [Episode],
    requested: &[String],
    updates: &[EpisodeStatusUpdate],
) -> usize {
    let requested: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let by_id: HashMap<&str, &EpisodeStatusUpdate> = updates
        .iter()
        .filter(|u| requested.contains(u.id.as_str()))
        .map(|u| (u.id.as_str(), u))
        .collect();
    if by_id.is_empty() {
        return 0;
    }

    let mut changed = 0;
    for episode in episodes.iter_mut() {
        let Some(update) = by_id.get(episode.id.as_str()) else {
            continue;
        };
        if episode.download_status != update.download_status
            || episode.error_log != update.error_log
        {
            episode.apply_status(update);
            changed += 1;
        }
    }
    changed
}
