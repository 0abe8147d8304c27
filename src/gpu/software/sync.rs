use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::gpu::{GPUError, Result, SemaphoreType};

/// Waits issued by queue workers are cut into slices of this length so a
/// shutting-down device is noticed.
pub(crate) const WORKER_WAIT_SLICE: Duration = Duration::from_millis(10);

/// A monotonic-or-settable `u64` guarded by a condition variable.
///
/// Every emulated primitive is one of these: fences and events hold 0/1,
/// binary semaphores count pending signals, timeline semaphores and queue
/// timelines hold their payload.
#[derive(Debug, Default)]
pub(crate) struct Counter {
    value: Mutex<u64>,
    cond: Condvar,
}

impl Counter {
    pub(crate) fn new(value: u64) -> Self {
        Self {
            value: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn value(&self) -> u64 {
        *self.value.lock()
    }

    pub(crate) fn set(&self, value: u64) {
        *self.value.lock() = value;
        self.cond.notify_all();
    }

    pub(crate) fn add(&self, n: u64) {
        *self.value.lock() += n;
        self.cond.notify_all();
    }

    /// Raise the value to `value`. Lower values are ignored.
    pub(crate) fn raise_to(&self, value: u64) {
        let mut v = self.value.lock();
        if value > *v {
            *v = value;
            self.cond.notify_all();
        }
    }

    /// Like [`Self::raise_to`], but a lower value is reported with the
    /// current one.
    pub(crate) fn advance(&self, value: u64) -> std::result::Result<(), u64> {
        let mut v = self.value.lock();
        if value < *v {
            return Err(*v);
        }
        if value > *v {
            *v = value;
            self.cond.notify_all();
        }
        Ok(())
    }

    /// Block until the value reaches `target` or `timeout` passes.
    pub(crate) fn wait_at_least(&self, target: u64, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut v = self.value.lock();
        while *v < target {
            match deadline {
                Some(d) => {
                    if self.cond.wait_until(&mut v, d).timed_out() {
                        return *v >= target;
                    }
                }
                None => self.cond.wait(&mut v),
            }
        }
        true
    }

    /// Block until the value is non-zero, then decrement it.
    pub(crate) fn take(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut v = self.value.lock();
        while *v == 0 {
            match deadline {
                Some(d) => {
                    if self.cond.wait_until(&mut v, d).timed_out() && *v == 0 {
                        return false;
                    }
                }
                None => self.cond.wait(&mut v),
            }
        }
        *v -= 1;
        true
    }

    /// Worker-side wait on `target`; gives up once `shutdown` is raised.
    pub(crate) fn wait_or_shutdown(&self, target: u64, shutdown: &AtomicBool) -> bool {
        while !self.wait_at_least(target, WORKER_WAIT_SLICE) {
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
        }
        true
    }

    /// Worker-side [`Self::take`]; gives up once `shutdown` is raised.
    pub(crate) fn take_or_shutdown(&self, shutdown: &AtomicBool) -> bool {
        while !self.take(WORKER_WAIT_SLICE) {
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
        }
        true
    }
}

pub(crate) fn timeout_from_ns(timeout_ns: u64) -> Duration {
    Duration::from_nanos(timeout_ns)
}

pub(crate) struct SoftwareFence {
    pub(crate) signal: std::sync::Arc<Counter>,
}

impl SoftwareFence {
    pub(crate) fn new(signaled: bool) -> Self {
        Self {
            signal: std::sync::Arc::new(Counter::new(signaled as u64)),
        }
    }

    pub(crate) fn wait(&self, timeout_ns: u64) -> bool {
        self.signal.wait_at_least(1, timeout_from_ns(timeout_ns))
    }

    pub(crate) fn reset(&self) {
        self.signal.set(0);
    }

    pub(crate) fn status(&self) -> bool {
        self.signal.value() >= 1
    }
}

pub(crate) struct SoftwareSemaphore {
    pub(crate) signal: std::sync::Arc<Counter>,
}

impl SoftwareSemaphore {
    pub(crate) fn new(ty: SemaphoreType, initial_value: u64) -> Self {
        let initial = match ty {
            SemaphoreType::Binary => 0,
            SemaphoreType::Timeline => initial_value,
        };
        Self {
            signal: std::sync::Arc::new(Counter::new(initial)),
        }
    }

    pub(crate) fn signal(&self, value: u64) -> Result<()> {
        self.signal
            .advance(value)
            .map_err(|current| GPUError::TimelineValueDecrease {
                current,
                requested: value,
            })
    }

    pub(crate) fn wait(&self, value: u64, timeout_ns: u64) -> bool {
        self.signal.wait_at_least(value, timeout_from_ns(timeout_ns))
    }

    pub(crate) fn current_value(&self) -> u64 {
        self.signal.value()
    }
}

pub(crate) struct SoftwareEvent {
    pub(crate) signal: std::sync::Arc<Counter>,
}

impl SoftwareEvent {
    pub(crate) fn new() -> Self {
        Self {
            signal: std::sync::Arc::new(Counter::new(0)),
        }
    }

    pub(crate) fn set(&self) {
        self.signal.set(1);
    }

    pub(crate) fn reset(&self) {
        self.signal.set(0);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.signal.value() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counter_wakes_waiters() {
        let c = Arc::new(Counter::new(0));
        let c2 = c.clone();
        let t = thread::spawn(move || c2.wait_at_least(3, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(5));
        c.raise_to(3);
        assert!(t.join().unwrap());
    }

    #[test]
    fn counter_never_lowers_on_raise() {
        let c = Counter::new(7);
        c.raise_to(2);
        assert_eq!(c.value(), 7);
        assert_eq!(c.advance(6), Err(7));
        assert_eq!(c.advance(7), Ok(()));
        assert_eq!(c.value(), 7);
    }

    #[test]
    fn take_consumes_one_signal() {
        let c = Counter::new(0);
        assert!(!c.take(Duration::from_millis(1)));
        c.add(2);
        assert!(c.take(Duration::ZERO));
        assert!(c.take(Duration::ZERO));
        assert!(!c.take(Duration::ZERO));
    }

    #[test]
    fn shutdown_breaks_worker_waits() {
        let c = Counter::new(0);
        let stop = AtomicBool::new(true);
        assert!(!c.wait_or_shutdown(1, &stop));
        assert!(!c.take_or_shutdown(&stop));
    }
}
