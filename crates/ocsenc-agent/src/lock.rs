use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

/// Task-level mutual exclusion with a bounded wait.
///
/// Serializes the acquisition process against other tasks of the same
/// agent. A failed acquire never blocks longer than the timeout; the caller
/// reports the failure instead.
#[derive(Debug, Default)]
pub struct TimeoutLock {
    mutex: Mutex<()>,
    job: Mutex<Option<String>>,
}

impl TimeoutLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `job`, waiting at most `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration, job: &str) -> Option<LockGuard<'_>> {
        let guard = if timeout.is_zero() {
            self.mutex.try_lock()
        } else {
            self.mutex.try_lock_for(timeout)
        }?;
        *self.job.lock() = Some(job.to_string());
        Some(LockGuard {
            _guard: guard,
            lock: self,
        })
    }

    /// Name of the job holding the lock.
    pub fn job(&self) -> Option<String> {
        self.job.lock().clone()
    }
}

/// Held lock; released on drop.
pub struct LockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    lock: &'a TimeoutLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        *self.lock.job.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let lock = TimeoutLock::new();
        let guard = lock.acquire_timeout(Duration::ZERO, "acq").unwrap();
        assert_eq!(lock.job().as_deref(), Some("acq"));
        assert!(lock.acquire_timeout(Duration::ZERO, "other").is_none());
        assert!(lock
            .acquire_timeout(Duration::from_millis(20), "other")
            .is_none());
        drop(guard);
        assert_eq!(lock.job(), None);
        assert!(lock.acquire_timeout(Duration::ZERO, "other").is_some());
    }

    #[test]
    fn waits_for_release() {
        let lock = Arc::new(TimeoutLock::new());
        let holder = Arc::clone(&lock);
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            let _guard = holder.acquire_timeout(Duration::ZERO, "acq").unwrap();
            tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
        });
        rx.recv().unwrap();
        assert!(lock.acquire_timeout(Duration::from_secs(5), "next").is_some());
        handle.join().unwrap();
    }
}
