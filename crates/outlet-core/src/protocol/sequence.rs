//! Thread-safe call-id counter for correlating replies with calls.
//!
//! Every call sent on a channel carries a call id; the host echoes it in the
//! reply so the reader task can hand the reply to the caller that is waiting
//! for it.  Id `0` is reserved for notifications, so the counter never hands
//! it out.
//!
//! The counter uses `AtomicU64` and is lock-free: concurrent callers on the
//! same channel never receive the same id.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::messages::NOTIFICATION_ID;

/// A thread-safe, monotonically increasing counter for call ids.
///
/// Ids start at 1 and wrap from `u64::MAX` back to 1, skipping the
/// notification id.
///
/// # Examples
///
/// ```rust
/// use outlet_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a new counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next call id and atomically advances the counter.
    ///
    /// `Ordering::Relaxed` is enough: ids only need to be unique, they do not
    /// publish any other memory.
    pub fn next(&self) -> u64 {
        loop {
            let id = self.inner.fetch_add(1, Ordering::Relaxed);
            if id != NOTIFICATION_ID {
                return id;
            }
        }
    }

    /// Returns the id the next call to [`next`](Self::next) would hand out,
    /// without advancing.  Diagnostic only.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
