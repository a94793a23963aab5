//! Repeating-timer capability used by the status poller.
//!
//! The controller never touches `tokio::time` directly; it asks a `Scheduler`
//! for a repeating tick and cancels it by handle.  Production code uses
//! `TokioScheduler`.  Tests use `ManualScheduler`, which only advances when
//! told to.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

/// Opaque id of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

pub type Tick = Box<dyn FnMut() + Send + 'static>;

pub trait Scheduler: Send {
    /// Run `tick` every `interval`, first firing one interval from now.
    fn schedule(&mut self, interval: Duration, tick: Tick) -> TimerHandle;

    /// Stop a timer.  Unknown or already-cancelled handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);
}

// ── TokioScheduler ───────────────────────────────────────────────────────────

/// One spawned task per timer.  Must be created inside a tokio runtime.
#[derive(Default)]
pub struct TokioScheduler {
    next_id: u64,
    timers: HashMap<TimerHandle, tokio::task::AbortHandle>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, interval: Duration, mut tick: Tick) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tick();
            }
        });
        debug!("scheduler: timer {:?} every {:?}", handle, interval);
        self.timers.insert(handle, task.abort_handle());
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.timers.remove(&handle) {
            debug!("scheduler: cancel {:?}", handle);
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
    }
}

// ── ManualScheduler ──────────────────────────────────────────────────────────

#[cfg(test)]
pub use manual::ManualScheduler;
