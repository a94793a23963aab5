//! Visibility sensor for the last rendered episode row.
//!
//! The controller arms the sentinel with a callback; the view reports after
//! every draw whether the last row is on screen.  The callback fires on the
//! hidden → visible edge, and once right after arming if the row is already
//! visible, the way an intersection observer reports its first observation.

use std::sync::{Arc, Mutex, MutexGuard};

pub type OnVisible = Box<dyn FnMut() + Send + 'static>;

pub trait ScrollSentinel: Send {
    /// Arm with a new callback, replacing (not adding to) any previous one.
    fn attach(&mut self, on_visible: OnVisible);

    /// Disarm.  Later visibility reports are ignored until the next attach.
    fn detach(&mut self);
}

#[derive(Default)]
struct SentinelState {
    on_visible: Option<OnVisible>,
    /// Last reported visibility since arming.  `None` = nothing reported yet.
    last_visible: Option<bool>,
    fired: usize,
}

/// Shared handle: the controller owns one clone, the episode list another.
#[derive(Clone, Default)]
pub struct ViewportSentinel {
    inner: Arc<Mutex<SentinelState>>,
}

impl ViewportSentinel {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SentinelState> {
        // Poisoning is ignored; the state has no invariant a panic can break.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report whether the last row is currently visible.
    pub fn observe(&self, visible: bool) {
        let mut state = self.state();
        let rising = visible && state.last_visible != Some(true);
        state.last_visible = Some(visible);
        if !rising {
            return;
        }
        if let Some(cb) = state.on_visible.as_mut() {
            cb();
            state.fired += 1;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state().on_visible.is_some()
    }

    /// Number of callbacks delivered over the sentinel's lifetime.
    pub fn fired(&self) -> usize {
        self.state().fired
    }
}

impl ScrollSentinel for ViewportSentinel {
    fn attach(&mut self, on_visible: OnVisible) {
        let mut state = self.state();
        state.on_visible = Some(on_visible);
        state.last_visible = None;
    }

    fn detach(&mut self) {
        let mut state = self.state();
        state.on_visible = None;
        state.last_visible = None;
    }
}
