//! Single-slot "latest value" streams.
//!
//! A `Mailbox` holds at most one value. Publishing overwrites whatever is there,
//! read or not, and never blocks on readers. Each `Subscriber` tracks the version it
//! last saw, so a slow reader skips intermediate values and only ever observes the
//! newest one.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Slot<T> {
    value: Option<Arc<T>>,
    version: u64,
    closed: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    cv: Condvar,
}

/// Writer side, owned by the pipeline worker.
pub(crate) struct Mailbox<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    value: None,
                    version: 0,
                    closed: false,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Replace the current value and wake waiting readers.
    pub(crate) fn publish(&self, value: T) {
        let mut slot = self.shared.slot.lock();
        if slot.closed {
            return;
        }
        slot.value = Some(Arc::new(value));
        slot.version += 1;
        drop(slot);
        self.shared.cv.notify_all();
    }

    /// Stop accepting values. Readers keep the last value and stop waiting.
    pub(crate) fn close(&self) {
        self.shared.slot.lock().closed = true;
        self.shared.cv.notify_all();
    }

    pub(crate) fn subscribe(&self) -> Subscriber<T> {
        Subscriber {
            shared: self.shared.clone(),
            seen: 0,
        }
    }
}

/// Read handle for one output stream.
///
/// Values are shared as `Arc<T>`: read-only, and kept alive only as long as the
/// reader holds them.
pub struct Subscriber<T> {
    shared: Arc<Shared<T>>,
    seen: u64,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            seen: self.seen,
        }
    }
}

impl<T> Subscriber<T> {
    /// Most recent value, whether or not it was seen before.
    pub fn latest(&mut self) -> Option<Arc<T>> {
        let slot = self.shared.slot.lock();
        self.seen = slot.version;
        slot.value.clone()
    }

    /// Most recent value if it is newer than the last one this handle returned.
    pub fn try_next(&mut self) -> Option<Arc<T>> {
        let slot = self.shared.slot.lock();
        if slot.version > self.seen {
            self.seen = slot.version;
            slot.value.clone()
        } else {
            None
        }
    }

    /// Block until a value newer than the last one seen is published, the stream is
    /// closed, or `timeout` elapses.
    pub fn wait_next(&mut self, timeout: Duration) -> Option<Arc<T>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while slot.version <= self.seen && !slot.closed {
            if self.shared.cv.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        if slot.version > self.seen {
            self.seen = slot.version;
            slot.value.clone()
        } else {
            None
        }
    }

    /// Number of values published so far.
    pub fn version(&self) -> u64 {
        self.shared.slot.lock().version
    }

    pub fn is_closed(&self) -> bool {
        self.shared.slot.lock().closed
    }
}
