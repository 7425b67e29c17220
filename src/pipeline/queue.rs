//! Blocking FIFO used for every hand-off between pipeline stages

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;

/// Thread-safe FIFO with blocking and timed pops.
///
/// The queue itself never refuses an item: producers read [`size`] and apply
/// their own backpressure policy before pushing.
///
/// [`size`]: BoundedQueue::size
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    pushed: AtomicUsize,
    popped: AtomicUsize,
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BoundedQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // Nothing can be left half-written by a panicking holder.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append at the tail and wake one waiting consumer.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();
    }

    /// Block until an item is available.
    pub fn pop_blocking(&self) -> T {
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.stats.popped.fetch_add(1, Ordering::Relaxed);
                return item;
            }
            items = self
                .ready
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block up to `timeout` for the head item.
    ///
    /// Returns `None` only once the full timeout has elapsed with the queue
    /// empty; spurious wakeups wait out the remainder.
    pub fn pop_with_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.stats.popped.fetch_add(1, Ordering::Relaxed);
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            items = self
                .ready
                .wait_timeout(items, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Current depth. Advisory only: it may be stale by the time it is read.
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Totals of (pushed, popped) items since creation
    pub fn stats(&self) -> (usize, usize) {
        (
            self.stats.pushed.load(Ordering::Relaxed),
            self.stats.popped.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pops_in_push_order() {
        let queue = BoundedQueue::new();
        for i in 0..100 {
            queue.push(i);
        }
        assert_eq!(queue.size(), 100);
        let popped: Vec<_> = (0..100).map(|_| queue.pop_blocking()).collect();
        assert_eq!(popped, (0..100).collect::<Vec<_>>());
        assert!(queue.is_empty());
        assert_eq!(queue.stats(), (100, 100));
    }

    #[test]
    fn timeout_on_empty_queue_waits_the_full_duration() {
        let queue: BoundedQueue<u8> = BoundedQueue::new();
        let timeout = Duration::from_millis(120);
        let start = Instant::now();
        assert_eq!(queue.pop_with_timeout(timeout), None);
        assert!(start.elapsed() >= timeout);
    }

    #[test]
    fn timed_pop_wakes_on_push() {
        let queue = Arc::new(BoundedQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.push("frame");
            })
        };

        let start = Instant::now();
        assert_eq!(queue.pop_with_timeout(Duration::from_secs(5)), Some("frame"));
        assert!(start.elapsed() < Duration::from_secs(5));
        producer.join().unwrap();
    }

    #[test]
    fn single_producer_order_survives_concurrent_consumers() {
        let queue = Arc::new(BoundedQueue::new());
        let total = 10_000;

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(item) = queue.pop_with_timeout(Duration::from_millis(200)) {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        for i in 0..total {
            queue.push(i);
        }

        let mut all = Vec::new();
        for consumer in consumers {
            let seen = consumer.join().unwrap();
            // Each consumer observes a strictly increasing subsequence.
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
            all.extend(seen);
        }

        all.sort_unstable();
        assert_eq!(all, (0..total).collect::<Vec<_>>());
    }
}
