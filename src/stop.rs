use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

type Waker = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    stopped: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

/// Process-wide cooperative cancellation flag.
///
/// Clones share the same flag. Blocking waits register a waker with
/// `on_stop` so that `trigger` interrupts them instead of leaving them parked.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn trigger(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Stop requested");
        let wakers = std::mem::take(&mut *self.inner.wakers.lock());
        for wake in wakers {
            wake();
        }
    }

    /// Runs `wake` once when the signal is triggered, or right away if it
    /// already was.
    pub fn on_stop<W>(&self, wake: W)
    where
        W: Fn() + Send + Sync + 'static,
    {
        let mut wakers = self.inner.wakers.lock();
        if self.is_stopped() {
            drop(wakers);
            wake();
            return;
        }
        wakers.push(Box::new(wake));
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_trigger_runs_wakers_once() {
        let stop = StopSignal::new();
        let woken = Arc::new(AtomicUsize::new(0));
        let counter = woken.clone();
        stop.on_stop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!stop.is_stopped());
        stop.trigger();
        stop.clone().trigger();

        assert!(stop.is_stopped());
        assert_eq!(woken.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_waker_runs_immediately() {
        let stop = StopSignal::new();
        stop.trigger();
        let woken = Arc::new(AtomicBool::new(false));
        let flag = woken.clone();

        stop.on_stop(move || flag.store(true, Ordering::SeqCst));

        assert!(woken.load(Ordering::SeqCst));
    }
}
