//! Refresh scheduling.
//!
//! Nothing here owns a timer. A [`RefreshScheduler`] hands out one-shot
//! refresh requests; whoever drives the display (the window event loop, or a
//! test) later fires them back by handle. [`AnimationLoop`] is the per-instance
//! clock and [`Ticker`] batches many instances onto one request.

mod ticker;

pub use ticker::Ticker;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::trace;

/// Identifies one pending refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefreshHandle(pub u64);

/// Source of "run on the next display refresh" callbacks.
pub trait RefreshScheduler {
    fn request_refresh(&mut self) -> RefreshHandle;

    /// Revokes a request. Unknown or already fired handles are ignored.
    fn cancel_refresh(&mut self, handle: RefreshHandle);
}

/// Scheduler shared by every clock on one thread.
pub type SharedScheduler = Rc<RefCell<dyn RefreshScheduler>>;

/// Pending refresh requests, fired in request order.
#[derive(Debug, Default)]
pub struct FrameQueue {
    next: u64,
    pending: VecDeque<RefreshHandle>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for building a [`SharedScheduler`].
    pub fn shared() -> Rc<RefCell<FrameQueue>> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Takes every request made so far. Requests made while the returned
    /// handles are being fired wait for the next refresh.
    pub fn drain(&mut self) -> Vec<RefreshHandle> {
        self.pending.drain(..).collect()
    }
}

impl RefreshScheduler for FrameQueue {
    fn request_refresh(&mut self) -> RefreshHandle {
        self.next += 1;
        let handle = RefreshHandle(self.next);
        self.pending.push_back(handle);
        handle
    }

    fn cancel_refresh(&mut self, handle: RefreshHandle) {
        self.pending.retain(|h| *h != handle);
    }
}

/// A self-rescheduling clock with at most one outstanding request.
#[derive(Debug, Default)]
pub struct AnimationLoop {
    pending: Option<RefreshHandle>,
}

impl AnimationLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.pending.is_some()
    }

    /// Schedules the first tick. Returns `false` when already running.
    pub fn start(&mut self, scheduler: &mut dyn RefreshScheduler) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(scheduler.request_refresh());
        true
    }

    /// Revokes the outstanding tick. A tick already being handled completes.
    pub fn stop(&mut self, scheduler: &mut dyn RefreshScheduler) {
        if let Some(handle) = self.pending.take() {
            scheduler.cancel_refresh(handle);
        }
    }

    /// Handles a fired refresh. When `handle` belongs to this clock the next
    /// tick is scheduled and `true` is returned: the caller should run one
    /// frame now.
    pub fn fire(&mut self, handle: RefreshHandle, scheduler: &mut dyn RefreshScheduler) -> bool {
        if self.pending != Some(handle) {
            return false;
        }
        self.pending = Some(scheduler.request_refresh());
        trace!(fired = handle.0, "Animation tick");
        true
    }
}
