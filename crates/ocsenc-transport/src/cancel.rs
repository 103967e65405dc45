use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Cooperative stop signal shared between an acquisition loop and whoever
/// asks it to stop.
///
/// Readers check the token between short poll slices and [`CancelToken::sleep`]
/// wakes immediately on cancellation, so shutdown latency is bounded by the
/// poll slice rather than by a socket timeout.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every sleeper.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.wake.notify_all();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleep for `duration` or until cancelled.
    ///
    /// Returns `true` if the full duration elapsed, `false` if woken by
    /// cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        let Some(deadline) = Instant::now().checked_add(duration) else {
            // Past the clock's range: only cancellation ends the wait.
            while !*cancelled {
                self.inner.wake.wait(&mut cancelled);
            }
            return false;
        };
        while !*cancelled {
            if self
                .inner
                .wake
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                return !*cancelled;
            }
        }
        false
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
