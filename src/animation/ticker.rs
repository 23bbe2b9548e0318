use super::{AnimationLoop, RefreshHandle, SharedScheduler};
use crate::instance::InstanceId;
use tracing::debug;

/// One refresh request shared by a pool of instances.
///
/// The ticker does not draw anything itself: [`Ticker::fire`] returns the
/// instances to draw for the current refresh, in the order they joined.
pub struct Ticker {
    pool: Vec<InstanceId>,
    clock: AnimationLoop,
    scheduler: SharedScheduler,
}

impl Ticker {
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self {
            pool: Vec::new(),
            clock: AnimationLoop::new(),
            scheduler,
        }
    }

    /// Adds an instance. Adding a member again is a no-op.
    pub fn add(&mut self, id: InstanceId) -> bool {
        if self.pool.contains(&id) {
            return false;
        }
        self.pool.push(id);
        debug!(instance = id.0, pool = self.pool.len(), "Joined ticker");
        true
    }

    /// Removes an instance. Removing a non-member is a no-op.
    pub fn remove(&mut self, id: InstanceId) -> bool {
        let Some(index) = self.pool.iter().position(|member| *member == id) else {
            return false;
        };
        self.pool.remove(index);
        debug!(instance = id.0, pool = self.pool.len(), "Left ticker");
        true
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.pool.contains(&id)
    }

    pub fn instances(&self) -> &[InstanceId] {
        &self.pool
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    pub fn start(&mut self) -> bool {
        self.clock.start(&mut *self.scheduler.borrow_mut())
    }

    pub fn stop(&mut self) {
        self.clock.stop(&mut *self.scheduler.borrow_mut());
    }

    /// Handles a fired refresh, returning a snapshot of the pool when the
    /// handle is the ticker's own.
    pub fn fire(&mut self, handle: RefreshHandle) -> Option<Vec<InstanceId>> {
        if self.clock.fire(handle, &mut *self.scheduler.borrow_mut()) {
            Some(self.pool.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::FrameQueue;

    #[test]
    fn test_add_and_remove_are_idempotent() {
        let mut ticker = Ticker::new(FrameQueue::shared());

        assert!(ticker.add(InstanceId(1)));
        assert!(!ticker.add(InstanceId(1)));
        assert!(ticker.add(InstanceId(2)));
        assert_eq!(ticker.instances(), &[InstanceId(1), InstanceId(2)]);

        assert!(ticker.remove(InstanceId(1)));
        assert!(!ticker.remove(InstanceId(1)));
        assert!(!ticker.remove(InstanceId(7)));
        assert_eq!(ticker.instances(), &[InstanceId(2)]);
    }

    #[test]
    fn test_one_request_serves_the_whole_pool() {
        let queue = FrameQueue::shared();
        let mut ticker = Ticker::new(queue.clone());
        ticker.add(InstanceId(1));
        ticker.add(InstanceId(2));
        ticker.add(InstanceId(3));

        assert!(ticker.start());
        assert!(!ticker.start());
        assert_eq!(queue.borrow().len(), 1);

        let handle = queue.borrow_mut().drain()[0];
        let drawn = ticker.fire(handle).unwrap();
        assert_eq!(drawn, vec![InstanceId(1), InstanceId(2), InstanceId(3)]);
        assert_eq!(queue.borrow().len(), 1);
    }

    #[test]
    fn test_stopped_ticker_ignores_refresh() {
        let queue = FrameQueue::shared();
        let mut ticker = Ticker::new(queue.clone());
        ticker.add(InstanceId(1));
        ticker.start();
        let handle = queue.borrow_mut().drain()[0];

        ticker.stop();
        assert!(ticker.fire(handle).is_none());
        assert!(queue.borrow().is_empty());
    }
}
