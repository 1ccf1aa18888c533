//! Cooperative cancellation via stop tokens.
//!
//! A [`StopSource`] owns the right to request a stop; any number of
//! [`StopToken`] clones observe it. I/O operations accept an optional token:
//!
//! - A token that is already fired when the operation is entered makes the
//!   operation resolve to [`ErrorKind::Cancelled`] without touching the OS.
//! - A token fired while the operation is suspended tears the wait down
//!   (readiness backend) or cancels the pending OS operation (completion
//!   backend) and resolves to `Cancelled`.
//! - Cancellation is best-effort: if the operation completes before the
//!   cancel is observed, the completion wins.
//!
//! [`ErrorKind::Cancelled`]: crate::error::ErrorKind::Cancelled

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Waker;

#[derive(Debug, Default)]
struct Shared {
    fired: AtomicBool,
    waiters: Mutex<Vec<Waker>>,
}

impl Shared {
    fn fire(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let waiters = std::mem::take(&mut *self.waiters.lock());
        for waker in waiters {
            waker.wake();
        }
    }
}

/// The owning side of a cancellation signal.
///
/// Dropping the source does not fire the signal; only
/// [`request_stop`](Self::request_stop) does.
#[derive(Debug, Default)]
pub struct StopSource {
    shared: Arc<Shared>,
}

impl StopSource {
    /// Creates a new, unfired stop source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token observing this source.
    #[must_use]
    pub fn token(&self) -> StopToken {
        StopToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Fires the signal, waking every registered waiter.
    ///
    /// Firing twice is a no-op.
    pub fn request_stop(&self) {
        self.shared.fire();
    }

    /// Returns true if the signal has fired.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.shared.fired.load(Ordering::Acquire)
    }
}

/// The observing side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct StopToken {
    shared: Arc<Shared>,
}

impl StopToken {
    /// Returns true if the signal has fired.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.shared.fired.load(Ordering::Acquire)
    }

    /// Registers a waker to be woken when the signal fires.
    ///
    /// If the signal has already fired the waker is woken immediately. A
    /// waker that [`will_wake`](Waker::will_wake) an already-registered one
    /// replaces it instead of accumulating.
    pub fn register(&self, waker: &Waker) {
        if self.stop_requested() {
            waker.wake_by_ref();
            return;
        }
        let mut waiters = self.shared.waiters.lock();
        // Re-check under the lock so a concurrent fire cannot strand us.
        if self.stop_requested() {
            drop(waiters);
            waker.wake_by_ref();
            return;
        }
        if let Some(slot) = waiters.iter_mut().find(|w| w.will_wake(waker)) {
            slot.clone_from(waker);
        } else {
            waiters.push(waker.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_waker() -> (Arc<CountingWaker>, Waker) {
        let inner = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&inner));
        (inner, waker)
    }

    #[test]
    fn starts_unfired() {
        let source = StopSource::new();
        assert!(!source.stop_requested());
        assert!(!source.token().stop_requested());
    }

    #[test]
    fn fire_is_visible_to_all_tokens() {
        let source = StopSource::new();
        let t1 = source.token();
        let t2 = t1.clone();
        source.request_stop();
        assert!(t1.stop_requested());
        assert!(t2.stop_requested());
    }

    #[test]
    fn fire_wakes_registered_waiters() {
        let source = StopSource::new();
        let token = source.token();
        let (count, waker) = counting_waker();
        token.register(&waker);
        assert_eq!(count.0.load(Ordering::SeqCst), 0);
        source.request_stop();
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_after_fire_wakes_immediately() {
        let source = StopSource::new();
        source.request_stop();
        let (count, waker) = counting_waker();
        source.token().register(&waker);
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_registration_is_collapsed() {
        let source = StopSource::new();
        let token = source.token();
        let (count, waker) = counting_waker();
        token.register(&waker);
        token.register(&waker);
        source.request_stop();
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn double_fire_is_idempotent() {
        let source = StopSource::new();
        let (count, waker) = counting_waker();
        source.token().register(&waker);
        source.request_stop();
        source.request_stop();
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
    }
}
