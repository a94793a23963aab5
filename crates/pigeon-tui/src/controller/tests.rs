//! Controller behavior against an in-memory backend.
//!
//! The mock backend keeps a mutable episode table so tests can flip statuses
//! the way the real download worker would.  Time only moves through
//! `ManualScheduler::advance`, and scrolling goes through the real
//! `ViewportSentinel`.

use super::*;
use std::sync::{Arc, Mutex};

use pigeon_proto::protocol::DownloadStatus;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::scheduler::ManualScheduler;
use crate::sentinel::ViewportSentinel;

const POLL: Duration = Duration::from_secs(3);

#[derive(Default)]
struct Backend {
    table: Vec<Episode>,
    list_calls: Vec<u32>,
    status_calls: Vec<Vec<String>>,
    mutation_calls: Vec<(Mutation, String)>,
    fail_list: bool,
    fail_status: bool,
    fail_mutation: bool,
    hold_lists: bool,
    /// Appended to every status response regardless of what was asked for.
    unsolicited: Vec<EpisodeStatusUpdate>,
}

#[derive(Clone)]
struct MockApi {
    backend: Arc<Mutex<Backend>>,
    gate: Arc<Semaphore>,
}

impl MockApi {
    fn new(table: Vec<Episode>) -> Self {
        Self {
            backend: Arc::new(Mutex::new(Backend {
                table,
                ..Backend::default()
            })),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Backend) -> R) -> R {
        f(&mut self.backend.lock().unwrap())
    }

    fn set_status(&self, id: &str, status: DownloadStatus) {
        self.with(|b| {
            for ep in b.table.iter_mut().filter(|e| e.id == id) {
                ep.download_status = Some(status.clone());
            }
        });
    }

    fn list_calls(&self) -> Vec<u32> {
        self.with(|b| b.list_calls.clone())
    }
}

impl EpisodeApi for MockApi {
    async fn list_episodes(
        &self,
        _feed_id: &str,
        page: u32,
        size: u32,
    ) -> Result<EpisodePage, ApiError> {
        let hold = self.with(|b| {
            b.list_calls.push(page);
            b.hold_lists
        });
        if hold {
            self.gate.acquire().await.expect("gate closed").forget();
        }
        self.with(|b| {
            if b.fail_list {
                return Err(ApiError::Server(503));
            }
            let size = size as usize;
            let start = (page as usize - 1) * size;
            Ok(EpisodePage {
                records: b.table.iter().skip(start).take(size).cloned().collect(),
                pages: b.table.len().div_ceil(size) as u32,
                ..EpisodePage::default()
            })
        })
    }

    async fn episode_status(&self, ids: &[String]) -> Result<Vec<EpisodeStatusUpdate>, ApiError> {
        self.with(|b| {
            b.status_calls.push(ids.to_vec());
            if b.fail_status {
                return Err(ApiError::Status(504));
            }
            let mut updates: Vec<EpisodeStatusUpdate> = b
                .table
                .iter()
                .filter(|e| ids.contains(&e.id))
                .map(|e| EpisodeStatusUpdate {
                    id: e.id.clone(),
                    download_status: e.download_status.clone(),
                    error_log: e.error_log.clone(),
                })
                .collect();
            updates.extend(b.unsolicited.iter().cloned());
            Ok(updates)
        })
    }

    async fn delete_episode(&self, id: &str) -> Result<(), ApiError> {
        self.with(|b| {
            b.mutation_calls.push((Mutation::Delete, id.to_string()));
            if b.fail_mutation {
                return Err(ApiError::Application {
                    code: 500,
                    msg: "Episode is being downloaded".into(),
                });
            }
            b.table.retain(|e| e.id != id);
            Ok(())
        })
    }

    async fn retry_episode(&self, id: &str) -> Result<(), ApiError> {
        self.with(|b| {
            b.mutation_calls.push((Mutation::Retry, id.to_string()));
            if b.fail_mutation {
                return Err(ApiError::RateLimited);
            }
            for ep in b.table.iter_mut().filter(|e| e.id == id) {
                ep.download_status = Some(DownloadStatus::Pending);
                ep.error_log = None;
            }
            Ok(())
        })
    }
}

fn episode(id: &str, status: DownloadStatus) -> Episode {
    let mut ep: Episode = serde_json::from_value(json!({
        "id": id,
        "channelId": "UC123",
        "title": format!("Episode {}", id),
        "description": "Long form description\nwith two lines",
        "publishedAt": "2024-05-01T08:30:00",
        "maxCoverUrl": format!("https://i.ytimg.com/vi/{}/maxresdefault.jpg", id),
        "duration": "PT42M10S",
        "position": 3,
    }))
    .unwrap();
    ep.download_status = Some(status);
    if ep.download_status == Some(DownloadStatus::Failed) {
        ep.error_log = Some("ERROR: Sign in to confirm you're not a bot".into());
    }
    ep
}

fn table(n: usize, status: DownloadStatus) -> Vec<Episode> {
    (0..n)
        .map(|i| episode(&format!("ep-{}", i), status.clone()))
        .collect()
}

struct Harness {
    ctl: FeedDetailController<MockApi>,
    rx: mpsc::UnboundedReceiver<ControllerEvent>,
    api: MockApi,
    clock: ManualScheduler,
    sentinel: ViewportSentinel,
}

impl Harness {
    fn new(table: Vec<Episode>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let api = MockApi::new(table);
        let clock = ManualScheduler::new();
        let sentinel = ViewportSentinel::new();
        let ctl = FeedDetailController::new(
            api.clone(),
            Box::new(clock.clone()),
            Box::new(sentinel.clone()),
            tx,
            &FeedConfig::default(),
        );
        Self {
            ctl,
            rx,
            api,
            clock,
            sentinel,
        }
    }

    /// Wait for the next event and feed it to the controller.
    async fn pump(&mut self) {
        let evt = timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for a controller event")
            .expect("event channel closed");
        self.ctl.handle(evt);
    }

    async fn pump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.pump().await;
        }
    }

    /// Let spawned tasks run, then assert nothing was posted.
    async fn assert_quiet(&mut self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert!(self.rx.try_recv().is_err(), "unexpected controller event");
    }

    async fn mount(&mut self, feed_id: &str) {
        self.ctl.mount(feed_id);
        self.pump().await;
    }

    /// Bring the last row into view and process the resulting page fetch.
    async fn scroll_to_end(&mut self) {
        self.sentinel.observe(false);
        self.sentinel.observe(true);
        self.pump_n(2).await;
    }

    async fn tick(&mut self) {
        self.clock.advance(POLL);
        self.pump_n(2).await;
    }

    fn statuses(&self) -> Vec<(String, Option<DownloadStatus>)> {
        self.ctl
            .episodes()
            .iter()
            .map(|e| (e.id.clone(), e.download_status.clone()))
            .collect()
    }
}

// ── Pagination ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_initial_mount_loads_first_page() {
    let mut h = Harness::new(table(25, DownloadStatus::Completed));
    h.mount("feed-1").await;

    assert_eq!(h.ctl.episodes().len(), 10);
    assert_eq!(h.ctl.episodes()[0].id, "ep-0");
    assert_eq!(h.ctl.current_page(), 1);
    assert!(h.ctl.has_more_episodes());
    assert!(!h.ctl.loading_episodes());
    assert!(h.sentinel.is_attached());
    assert_eq!(h.api.list_calls(), vec![1]);
}

#[tokio::test]
async fn test_rapid_sentinel_triggers_issue_one_fetch() {
    let mut h = Harness::new(table(25, DownloadStatus::Completed));
    h.mount("feed-1").await;
    h.api.with(|b| b.hold_lists = true);

    // Two visibility callbacks land before either is processed.
    h.sentinel.observe(true);
    h.sentinel.observe(false);
    h.sentinel.observe(true);
    h.pump_n(2).await;
    h.assert_quiet().await;

    assert_eq!(h.api.list_calls(), vec![1, 2]);
    assert!(h.ctl.loading_episodes());
    assert_eq!(h.ctl.current_page(), 2);

    h.api.gate.add_permits(1);
    h.pump().await;
    assert!(!h.ctl.loading_episodes());
    assert_eq!(h.ctl.episodes().len(), 20);
    assert_eq!(h.ctl.episodes()[10].id, "ep-10");
}

#[tokio::test]
async fn test_pagination_stops_after_last_page() {
    let mut h = Harness::new(table(25, DownloadStatus::Completed));
    h.mount("feed-1").await;
    h.scroll_to_end().await;
    h.scroll_to_end().await;

    assert_eq!(h.ctl.episodes().len(), 25);
    assert_eq!(h.ctl.current_page(), 3);
    assert!(!h.ctl.has_more_episodes());
    assert!(!h.sentinel.is_attached());

    h.sentinel.observe(false);
    h.sentinel.observe(true);
    h.assert_quiet().await;
    assert!(!h.ctl.on_sentinel_visible());
    assert_eq!(h.api.list_calls(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_pages_concatenate_in_order() {
    let mut h = Harness::new(table(30, DownloadStatus::Completed));
    h.mount("feed-1").await;
    h.scroll_to_end().await;
    h.scroll_to_end().await;

    let ids: Vec<String> = h.ctl.episodes().iter().map(|e| e.id.clone()).collect();
    let expected: Vec<String> = (0..30).map(|i| format!("ep-{}", i)).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_failed_page_keeps_list_and_can_be_retried() {
    let mut h = Harness::new(table(25, DownloadStatus::Completed));
    h.mount("feed-1").await;
    h.api.with(|b| b.fail_list = true);

    h.scroll_to_end().await;
    assert_eq!(h.ctl.episodes().len(), 10);
    assert_eq!(h.ctl.current_page(), 1);
    assert!(!h.ctl.loading_episodes());
    assert_eq!(
        h.ctl.drain_notices(),
        vec![Notice::Error(
            "Internal server error, please contact administrator.".into()
        )]
    );

    h.api.with(|b| b.fail_list = false);
    h.scroll_to_end().await;
    assert_eq!(h.ctl.episodes().len(), 20);
    assert_eq!(h.api.list_calls(), vec![1, 2, 2]);
}

#[tokio::test]
async fn test_stale_sentinel_arming_is_ignored() {
    let mut h = Harness::new(table(35, DownloadStatus::Completed));
    h.mount("feed-1").await;

    // Callback from the first arming is still queued when page 2 lands.
    h.sentinel.observe(true);
    let queued = h.rx.recv().await.unwrap();
    assert!(h.ctl.on_sentinel_visible());
    h.pump().await;
    assert_eq!(h.ctl.current_page(), 2);

    h.ctl.handle(queued);
    h.assert_quiet().await;
    assert_eq!(h.api.list_calls(), vec![1, 2]);
}

// ── Status polling ────────────────────────────────────────────────────────────

#[test]
fn test_merge_updates_only_matching_status_fields() {
    let mut episodes = vec![
        episode("A", DownloadStatus::Downloading),
        episode("B", DownloadStatus::Completed),
        episode("C", DownloadStatus::Failed),
    ];
    let before = serde_json::to_value(&episodes).unwrap();

    let requested = vec!["A".to_string()];
    let updates = vec![EpisodeStatusUpdate {
        id: "A".into(),
        download_status: Some(DownloadStatus::Queued),
        error_log: None,
    }];
    assert_eq!(merge_status_updates(&mut episodes, &requested, &updates), 1);

    let after = serde_json::to_value(&episodes).unwrap();
    let mut expected = before.clone();
    expected[0]["downloadStatus"] = json!("QUEUED");
    assert_eq!(after, expected);
}

#[test]
fn test_merge_ignores_ids_that_were_not_requested() {
    let mut episodes = vec![
        episode("A", DownloadStatus::Downloading),
        episode("B", DownloadStatus::Completed),
    ];
    let updates = vec![EpisodeStatusUpdate {
        id: "B".into(),
        download_status: Some(DownloadStatus::Pending),
        error_log: None,
    }];
    assert_eq!(
        merge_status_updates(&mut episodes, &["A".to_string()], &updates),
        0
    );
    assert_eq!(episodes[1].download_status, Some(DownloadStatus::Completed));
}

#[tokio::test]
async fn test_poll_merges_by_id_and_leaves_others_untouched() {
    let mut h = Harness::new(vec![
        episode("A", DownloadStatus::Downloading),
        episode("B", DownloadStatus::Completed),
        episode("C", DownloadStatus::Failed),
    ]);
    h.mount("feed-1").await;
    assert!(h.ctl.is_polling());

    let before = serde_json::to_value(h.ctl.episodes()).unwrap();
    h.api.set_status("A", DownloadStatus::Queued);
    h.api.with(|b| {
        b.unsolicited.push(EpisodeStatusUpdate {
            id: "B".into(),
            download_status: Some(DownloadStatus::Pending),
            error_log: None,
        })
    });
    h.tick().await;

    assert_eq!(
        h.statuses(),
        vec![
            ("A".to_string(), Some(DownloadStatus::Queued)),
            ("B".to_string(), Some(DownloadStatus::Completed)),
            ("C".to_string(), Some(DownloadStatus::Failed)),
        ]
    );
    let mut expected = before;
    expected[0]["downloadStatus"] = json!("QUEUED");
    assert_eq!(serde_json::to_value(h.ctl.episodes()).unwrap(), expected);
    assert_eq!(h.api.with(|b| b.status_calls.clone()), vec![vec!["A".to_string()]]);
}

#[tokio::test]
async fn test_no_active_episodes_never_polls() {
    let mut h = Harness::new(vec![
        episode("A", DownloadStatus::Completed),
        episode("B", DownloadStatus::Failed),
        episode("C", DownloadStatus::Other("ARCHIVED".into())),
    ]);
    h.mount("feed-1").await;

    assert!(!h.ctl.is_polling());
    assert_eq!(h.clock.scheduled_total(), 0);
    assert!(!h.ctl.refresh_active_episodes());

    h.clock.advance(Duration::from_secs(30));
    h.assert_quiet().await;
    assert!(h.api.with(|b| b.status_calls.is_empty()));
}

#[tokio::test]
async fn test_retry_starts_polling_and_completion_stops_it() {
    let mut h = Harness::new(vec![
        episode("A", DownloadStatus::Completed),
        episode("B", DownloadStatus::Failed),
    ]);
    h.mount("feed-1").await;
    assert_eq!(h.clock.active_timers(), 0);

    h.ctl.retry_episode("B");
    h.pump_n(2).await;
    assert_eq!(h.ctl.episodes()[1].download_status, Some(DownloadStatus::Pending));
    assert_eq!(h.ctl.episodes()[1].error_log, None);
    assert!(h.ctl.is_polling());
    assert_eq!(h.clock.active_timers(), 1);

    h.api.set_status("B", DownloadStatus::Downloading);
    h.tick().await;
    assert!(h.ctl.is_polling());

    h.api.set_status("B", DownloadStatus::Completed);
    h.tick().await;
    assert!(!h.ctl.is_polling());
    assert_eq!(h.clock.active_timers(), 0);

    h.clock.advance(Duration::from_secs(30));
    h.assert_quiet().await;
    assert_eq!(h.api.with(|b| b.status_calls.len()), 2);
}

#[tokio::test]
async fn test_incidental_page_loads_do_not_restart_timer() {
    let mut table = table(25, DownloadStatus::Completed);
    table[0].download_status = Some(DownloadStatus::Downloading);
    let mut h = Harness::new(table);
    h.mount("feed-1").await;
    assert_eq!(h.clock.scheduled_total(), 1);

    h.clock.advance(Duration::from_secs(2));
    h.scroll_to_end().await;
    assert_eq!(h.clock.scheduled_total(), 1);
    assert_eq!(h.clock.active_timers(), 1);

    // Still on the original cadence: first tick lands at t=3s.
    h.clock.advance(Duration::from_secs(1));
    h.pump_n(2).await;
    assert_eq!(h.api.with(|b| b.status_calls.len()), 1);
}

#[tokio::test]
async fn test_failed_poll_leaves_list_intact_and_keeps_polling() {
    let mut h = Harness::new(table(3, DownloadStatus::Downloading));
    h.mount("feed-1").await;
    let before = serde_json::to_value(h.ctl.episodes()).unwrap();

    h.api.with(|b| b.fail_status = true);
    h.tick().await;
    assert_eq!(serde_json::to_value(h.ctl.episodes()).unwrap(), before);
    assert!(h.ctl.is_polling());
    assert!(h.ctl.drain_notices().is_empty());

    h.api.with(|b| {
        b.fail_status = false;
        for ep in b.table.iter_mut() {
            ep.download_status = Some(DownloadStatus::Completed);
        }
    });
    h.tick().await;
    assert!(!h.ctl.is_polling());
    assert_eq!(h.api.with(|b| b.status_calls.len()), 2);
}

// ── Mutations ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_forces_reload_to_first_page() {
    let mut h = Harness::new(table(30, DownloadStatus::Completed));
    h.mount("feed-1").await;
    h.scroll_to_end().await;
    h.scroll_to_end().await;
    assert_eq!(h.ctl.episodes().len(), 30);
    assert_eq!(h.ctl.current_page(), 3);

    h.ctl.delete_episode("ep-15");
    h.pump_n(2).await;

    assert_eq!(h.ctl.episodes().len(), 10);
    assert_eq!(h.ctl.current_page(), 1);
    assert!(h.ctl.has_more_episodes());
    assert_eq!(h.api.list_calls(), vec![1, 2, 3, 1]);
    assert_eq!(
        h.ctl.drain_notices(),
        vec![Notice::Success("Episode deleted".into())]
    );
}

#[tokio::test]
async fn test_failed_mutation_does_not_reload() {
    let mut h = Harness::new(table(12, DownloadStatus::Failed));
    h.mount("feed-1").await;
    h.api.with(|b| b.fail_mutation = true);

    h.ctl.delete_episode("ep-1");
    h.pump().await;
    h.ctl.retry_episode("ep-2");
    h.pump().await;
    h.assert_quiet().await;

    assert_eq!(h.api.list_calls(), vec![1]);
    assert_eq!(h.ctl.episodes().len(), 10);
    assert_eq!(
        h.ctl.drain_notices(),
        vec![
            Notice::Error("Delete failed: Episode is being downloaded".into()),
            Notice::Error("Retry failed: Too many requests, please try again later.".into()),
        ]
    );
}

#[tokio::test]
async fn test_delete_during_scroll_fetch_reloads_after_it_lands() {
    let mut h = Harness::new(table(30, DownloadStatus::Completed));
    h.mount("feed-1").await;
    h.api.with(|b| b.hold_lists = true);

    // Page 2 is in flight when the delete succeeds.
    h.sentinel.observe(true);
    h.pump().await;
    h.ctl.delete_episode("ep-0");
    h.pump().await;
    assert!(h.ctl.loading_episodes());
    assert_eq!(h.api.list_calls(), vec![1, 2]);

    h.api.gate.add_permits(2);
    h.pump_n(2).await;
    let ids: Vec<String> = h.ctl.episodes().iter().map(|e| e.id.clone()).collect();
    let expected: Vec<String> = (1..11).map(|i| format!("ep-{}", i)).collect();
    assert_eq!(ids, expected);
    assert_eq!(h.ctl.current_page(), 1);
    assert!(!h.ctl.loading_episodes());
    assert_eq!(h.api.list_calls(), vec![1, 2, 1]);

    h.api.with(|b| b.hold_lists = false);
    h.scroll_to_end().await;
    let ids: Vec<String> = h.ctl.episodes().iter().map(|e| e.id.clone()).collect();
    let expected: Vec<String> = (1..21).map(|i| format!("ep-{}", i)).collect();
    assert_eq!(ids, expected);
    assert_eq!(h.api.list_calls(), vec![1, 2, 1, 2]);
    assert_eq!(
        h.ctl.drain_notices(),
        vec![Notice::Success("Episode deleted".into())]
    );
}

#[tokio::test]
async fn test_failed_reload_after_delete_keeps_list() {
    let mut h = Harness::new(table(30, DownloadStatus::Completed));
    h.mount("feed-1").await;
    h.scroll_to_end().await;
    let before = serde_json::to_value(h.ctl.episodes()).unwrap();

    h.api.with(|b| b.fail_list = true);
    h.ctl.delete_episode("ep-3");
    h.pump_n(2).await;

    assert_eq!(serde_json::to_value(h.ctl.episodes()).unwrap(), before);
    assert!(!h.ctl.loading_episodes());
    assert_eq!(h.ctl.current_page(), 2);
    assert_eq!(
        h.ctl.drain_notices(),
        vec![
            Notice::Success("Episode deleted".into()),
            Notice::Error("Internal server error, please contact administrator.".into()),
        ]
    );
    assert_eq!(h.api.list_calls(), vec![1, 2, 1]);
}

#[tokio::test]
async fn test_failed_reload_after_superseded_page_rolls_back() {
    let mut h = Harness::new(table(30, DownloadStatus::Completed));
    h.mount("feed-1").await;
    h.api.with(|b| b.hold_lists = true);

    h.sentinel.observe(true);
    h.pump().await;
    assert_eq!(h.ctl.current_page(), 2);
    h.ctl.delete_episode("ep-0");
    h.pump().await;

    h.api.with(|b| b.fail_list = true);
    h.api.gate.add_permits(2);
    h.pump_n(2).await;
    assert_eq!(h.ctl.episodes().len(), 10);
    assert_eq!(h.ctl.current_page(), 1);
    assert!(!h.ctl.loading_episodes());

    h.api.with(|b| {
        b.fail_list = false;
        b.hold_lists = false;
    });
    h.ctl.on_sentinel_visible();
    h.pump().await;
    assert_eq!(h.api.list_calls(), vec![1, 2, 1, 2]);
    assert_eq!(h.ctl.episodes().len(), 20);
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unmount_cancels_timer_and_drops_late_results() {
    let mut h = Harness::new(table(15, DownloadStatus::Downloading));
    h.mount("feed-1").await;
    assert!(h.ctl.is_polling());

    h.api.with(|b| b.hold_lists = true);
    h.sentinel.observe(true);
    h.pump().await;
    assert!(h.ctl.loading_episodes());

    h.ctl.unmount();
    assert!(!h.ctl.is_polling());
    assert_eq!(h.clock.active_timers(), 0);
    assert!(!h.sentinel.is_attached());
    assert!(h.ctl.episodes().is_empty());

    h.api.gate.add_permits(1);
    h.pump().await;
    assert!(h.ctl.episodes().is_empty());
    assert_eq!(h.ctl.window(), PageWindow::default());

    h.clock.advance(Duration::from_secs(30));
    h.assert_quiet().await;
}

#[tokio::test]
async fn test_mounting_another_feed_resets_window() {
    let mut h = Harness::new(table(25, DownloadStatus::Completed));
    h.mount("feed-1").await;
    h.scroll_to_end().await;
    assert_eq!(h.ctl.current_page(), 2);

    h.mount("feed-2").await;
    assert_eq!(h.ctl.feed_id(), Some("feed-2"));
    assert_eq!(h.ctl.current_page(), 1);
    assert_eq!(h.ctl.episodes().len(), 10);
    assert!(h.ctl.has_more_episodes());
}

#[tokio::test]
async fn test_stale_poll_tick_after_remount_is_dropped() {
    let mut h = Harness::new(table(2, DownloadStatus::Queued));
    h.mount("feed-1").await;
    h.clock.advance(POLL);
    let stale_tick = h.rx.recv().await.unwrap();

    h.api.with(|b| b.table.clear());
    h.mount("feed-2").await;
    h.ctl.handle(stale_tick);
    h.assert_quiet().await;
    assert!(h.api.with(|b| b.status_calls.is_empty()));
}
