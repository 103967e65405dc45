use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What a full [`SampleQueue`] does with a new item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room.
    #[default]
    DropOldest,
    /// Reject the new item.
    DropNewest,
}

/// Bounded multi-producer FIFO between a reader thread and the
/// acquisition loop.
pub struct SampleQueue<T> {
    queue: ArrayQueue<T>,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl<T> SampleQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue an item. Returns false if an item was dropped to honor the bound.
    pub fn push(&self, item: T) -> bool {
        let overflowed = match self.policy {
            OverflowPolicy::DropOldest => self.queue.force_push(item).is_some(),
            OverflowPolicy::DropNewest => self.queue.push(item).is_err(),
        };
        if overflowed {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % 1000 == 0 {
                warn!(
                    dropped,
                    capacity = self.queue.capacity(),
                    policy = ?self.policy,
                    "sample queue full, dropping"
                );
            }
        }
        !overflowed
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Remove and return everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.queue.len());
        while let Some(item) = self.queue.pop() {
            items.push(item);
        }
        items
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Items dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

/// Publish when enough samples have accumulated or enough time has passed,
/// whichever comes first.
#[derive(Debug, Clone)]
pub struct PublishSchedule {
    max_samples: usize,
    max_interval: Duration,
    last_published: Instant,
}

impl PublishSchedule {
    /// Start the interval clock now.
    pub fn new(max_samples: usize, max_interval: Duration) -> Self {
        Self::starting_at(max_samples, max_interval, Instant::now())
    }

    pub fn starting_at(max_samples: usize, max_interval: Duration, start: Instant) -> Self {
        Self {
            max_samples,
            max_interval,
            last_published: start,
        }
    }

    /// True when `pending` samples should be published now.
    pub fn is_due(&self, pending: usize) -> bool {
        self.is_due_at(pending, Instant::now())
    }

    pub fn is_due_at(&self, pending: usize, now: Instant) -> bool {
        pending >= self.max_samples
            || (pending > 0 && now.saturating_duration_since(self.last_published) > self.max_interval)
    }

    /// Restart the interval clock.
    pub fn mark_published(&mut self) {
        self.mark_published_at(Instant::now());
    }

    pub fn mark_published_at(&mut self, now: Instant) {
        self.last_published = now;
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn drop_oldest_keeps_newest_items() {
        let queue = SampleQueue::new(3, OverflowPolicy::DropOldest);
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.drain(), vec![2, 3, 4]);
        assert_eq!(queue.dropped(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn drop_newest_rejects_when_full() {
        let queue = SampleQueue::new(2, OverflowPolicy::DropNewest);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));
        assert_eq!(queue.drain(), vec![1, 2]);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn concurrent_producers() {
        let queue = Arc::new(SampleQueue::new(1024, OverflowPolicy::DropOldest));
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.push(p * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 400);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn schedule_due_on_count_or_interval() {
        let start = Instant::now();
        let mut schedule = PublishSchedule::starting_at(10, Duration::from_secs(1), start);

        assert!(!schedule.is_due_at(0, start + Duration::from_secs(5)));
        assert!(!schedule.is_due_at(9, start));
        assert!(schedule.is_due_at(10, start));
        assert!(schedule.is_due_at(1, start + Duration::from_millis(1001)));

        schedule.mark_published_at(start + Duration::from_secs(2));
        assert!(!schedule.is_due_at(1, start + Duration::from_millis(2500)));
    }
}
