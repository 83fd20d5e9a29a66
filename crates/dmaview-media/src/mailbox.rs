//! Single-slot, drop-oldest exchange point between the producer and the
//! render loop.
//!
//! `publish` overwrites whatever is pending; `adopt_latest` takes it. Neither
//! blocks beyond the O(1) swap under the mutex, and displaced values are
//! dropped after the guard is released so buffer teardown never runs under
//! the lock.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Holds at most one unconsumed value.
pub struct SampleMailbox<T> {
    slot: Mutex<Option<T>>,
    published: AtomicU64,
    adopted: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of mailbox counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxStats {
    pub published: u64,
    pub adopted: u64,
    /// Values overwritten before anyone adopted them.
    pub dropped: u64,
}

impl<T> SampleMailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            published: AtomicU64::new(0),
            adopted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Install `value` as the pending slot, releasing any value that was never
    /// adopted.
    pub fn publish(&self, value: T) {
        let displaced = self.slot.lock().replace(value);
        self.published.fetch_add(1, Ordering::Relaxed);
        if displaced.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        drop(displaced);
    }

    /// Take the pending value, leaving the slot empty.
    pub fn adopt_latest(&self) -> Option<T> {
        let taken = self.slot.lock().take();
        if taken.is_some() {
            self.adopted.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    /// Whether a value is pending. Only a snapshot: the other side may change
    /// it immediately after.
    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Drop the pending value, if any, without counting it as adopted.
    pub fn clear(&self) {
        let displaced = self.slot.lock().take();
        if displaced.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            published: self.published.load(Ordering::Relaxed),
            adopted: self.adopted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for SampleMailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SampleMailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleMailbox")
            .field("pending", &self.has_pending())
            .field("stats", &self.stats())
            .finish()
    }
}
