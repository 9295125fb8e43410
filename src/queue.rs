use crate::stop::StopSignal;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Thread-safe FIFO shared between pipeline stages.
///
/// Every method takes the lock once, so each call is atomic on its own.
/// `take_latest` and `wait_latest` pop the newest item and drop the backlog
/// under a single lock, which keeps a frame that arrives mid-operation from
/// being cleared unseen.
pub struct SharedQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }
}

impl<T> SharedQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
        self.ready.notify_one();
    }

    /// Pops the oldest item.
    pub fn dequeue_one(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Drops every queued item and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let count = items.len();
        items.clear();
        count
    }

    /// Pops the newest item and discards the rest of the backlog.
    ///
    /// Returns the item together with the number of discarded items.
    pub fn take_latest(&self) -> Option<(T, usize)> {
        let mut items = self.items.lock();
        Self::drain_latest(&mut items)
    }

    /// Blocks until an item is available or `stop` is triggered.
    ///
    /// Returns `None` only once the stop signal is set.
    pub fn wait_latest(&self, stop: &StopSignal) -> Option<(T, usize)> {
        let mut items = self.items.lock();
        loop {
            if stop.is_stopped() {
                return None;
            }
            if let Some(latest) = Self::drain_latest(&mut items) {
                return Some(latest);
            }
            self.ready.wait(&mut items);
        }
    }

    /// Blocks until the oldest item can be popped or `stop` is triggered.
    pub fn wait_one(&self, stop: &StopSignal) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if stop.is_stopped() {
                return None;
            }
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            self.ready.wait(&mut items);
        }
    }

    /// Wakes every thread parked in `wait_latest` or `wait_one`.
    pub fn wake_all(&self) {
        // Taking the lock orders this wakeup after any waiter's stop check.
        let _items = self.items.lock();
        self.ready.notify_all();
    }

    /// Makes `stop` interrupt waits on this queue.
    pub fn wake_on(self: &Arc<Self>, stop: &StopSignal)
    where
        T: Send + 'static,
    {
        let queue = Arc::downgrade(self);
        stop.on_stop(move || {
            if let Some(queue) = queue.upgrade() {
                queue.wake_all();
            }
        });
    }

    fn drain_latest(items: &mut VecDeque<T>) -> Option<(T, usize)> {
        let latest = items.pop_back()?;
        let dropped = items.len();
        items.clear();
        Some((latest, dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_operations() {
        let queue = SharedQueue::new();
        assert!(queue.is_empty());

        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue_one(), Some(1));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue_one(), None);
    }

    #[test]
    fn test_take_latest_discards_backlog() {
        let queue = SharedQueue::new();
        for frame in 0..5 {
            queue.enqueue(frame);
        }

        assert_eq!(queue.take_latest(), Some((4, 4)));
        assert!(queue.is_empty());
        assert_eq!(queue.take_latest(), None);
    }

    #[test]
    fn test_wait_latest_wakes_on_enqueue() {
        let queue = Arc::new(SharedQueue::new());
        let stop = StopSignal::new();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.enqueue("frame");
            })
        };

        assert_eq!(queue.wait_latest(&stop), Some(("frame", 0)));
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_one_keeps_fifo_order() {
        let queue = SharedQueue::new();
        let stop = StopSignal::new();
        queue.enqueue('a');
        queue.enqueue('b');

        assert_eq!(queue.wait_one(&stop), Some('a'));
        assert_eq!(queue.wait_one(&stop), Some('b'));

        stop.trigger();
        queue.enqueue('c');
        assert_eq!(queue.wait_one(&stop), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_wait_latest_wakes_on_stop() {
        let queue: Arc<SharedQueue<u8>> = Arc::new(SharedQueue::new());
        let stop = StopSignal::new();
        queue.wake_on(&stop);

        let waiter = {
            let queue = queue.clone();
            let stop = stop.clone();
            thread::spawn(move || queue.wait_latest(&stop))
        };

        thread::sleep(Duration::from_millis(20));
        stop.trigger();

        assert_eq!(waiter.join().unwrap(), None);
    }
}
