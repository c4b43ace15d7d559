//! # Driver Timer
//!
//! The driver keeps at most one timer outstanding. Timers never call back
//! into the driver directly: a firing is delivered as a [`TimerEvent`] on the
//! driver's own execution context, tagged with the id of the handle that
//! produced it. The driver discards firings whose id no longer matches its
//! active handle, so a cancel that races with a firing is harmless.
//!
//! Two schedulers implement [`Scheduler`]:
//!
//! - [`TokioScheduler`] spawns a sleeping task per timer and delivers over an
//!   unbounded mpsc channel. Cancelling aborts the task.
//! - [`ManualScheduler`] only records what was asked of it. Tests decide
//!   when, and whether, timers fire.

use crate::radio::fsm::Event;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

pub type TimerId = u64;

/// Something the scheduler hands back to the driver's loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The timer with this id ran out
    Fired(TimerId),
    /// An event deferred to the next turn
    Deferred(Event),
}

/// Cancellable handle to one scheduled timer
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: TimerId,
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    pub fn new(id: TimerId) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
            abort: None,
        }
    }

    fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Cancel the timer. Safe to call any number of times, and after the
    /// timer has already fired.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            if let Some(abort) = &self.abort {
                abort.abort();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Source of timers and deferred events for the driver
pub trait Scheduler: Send {
    /// Deliver `TimerEvent::Fired(handle.id())` after `delay`
    fn schedule(&mut self, delay: Duration) -> TimerHandle;

    /// Deliver `TimerEvent::Deferred(event)` on the next turn, never inline
    fn defer(&mut self, event: Event);
}

/// Scheduler backed by tokio tasks
#[derive(Debug)]
pub struct TokioScheduler {
    tx: UnboundedSender<TimerEvent>,
    next_id: TimerId,
}

impl TokioScheduler {
    /// Must be used from within a tokio runtime
    pub fn new(tx: UnboundedSender<TimerEvent>) -> Self {
        Self { tx, next_id: 1 }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;

        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver gone means the driver stopped
            let _ = tx.send(TimerEvent::Fired(id));
        });
        TimerHandle::new(id).with_abort(task.abort_handle())
    }

    fn defer(&mut self, event: Event) {
        if self.tx.send(TimerEvent::Deferred(event)).is_err() {
            log::warn!("deferred {:?} dropped, driver loop gone", event);
        }
    }
}

#[derive(Debug)]
struct ManualTimer {
    handle: TimerHandle,
    delay: Duration,
    fired: bool,
}

#[derive(Debug, Default)]
struct ManualState {
    timers: Vec<ManualTimer>,
    deferred: VecDeque<Event>,
}

/// Scheduler driven by hand, for tests and benches
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Timers neither fired nor cancelled, as (id, delay)
    pub fn armed(&self) -> Vec<(TimerId, Duration)> {
        self.lock()
            .timers
            .iter()
            .filter(|t| !t.fired && !t.handle.is_cancelled())
            .map(|t| (t.handle.id(), t.delay))
            .collect()
    }

    /// Total timers ever scheduled
    pub fn scheduled_count(&self) -> usize {
        self.lock().timers.len()
    }

    /// Fire the newest armed timer
    pub fn fire(&self) -> Option<TimerId> {
        let mut state = self.lock();
        let timer = state
            .timers
            .iter_mut()
            .rev()
            .find(|t| !t.fired && !t.handle.is_cancelled())?;
        timer.fired = true;
        Some(timer.handle.id())
    }

    pub fn take_deferred(&self) -> Vec<Event> {
        self.lock().deferred.drain(..).collect()
    }

    /// Next thing a real loop would deliver: deferred events first, then
    /// the newest armed timer
    pub fn next_event(&self) -> Option<TimerEvent> {
        if let Some(event) = self.lock().deferred.pop_front() {
            return Some(TimerEvent::Deferred(event));
        }
        self.fire().map(TimerEvent::Fired)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerHandle {
        let mut state = self.lock();
        let handle = TimerHandle::new(state.timers.len() as TimerId + 1);
        state.timers.push(ManualTimer {
            handle: handle.clone(),
            delay,
            fired: false,
        });
        handle
    }

    fn defer(&mut self, event: Event) {
        self.lock().deferred.push_back(event);
    }
}
