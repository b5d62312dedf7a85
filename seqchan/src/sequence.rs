//! Sequence counter for the seqlock publish protocol

use std::sync::atomic::{AtomicU64, Ordering, fence};

/// Odd/even sequence counter over a shared `AtomicU64`.
///
/// The writer moves the counter to the next odd value before touching the
/// payload and to the next even value afterwards. Readers compare the value
/// before and after a payload copy to detect concurrent modification.
#[derive(Debug, Clone, Copy)]
pub struct SequenceCounter<'a> {
    counter: &'a AtomicU64,
}

impl<'a> SequenceCounter<'a> {
    /// Wrap a counter living in shared memory
    pub fn new(counter: &'a AtomicU64) -> Self {
        Self { counter }
    }

    /// Current value
    pub fn load(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Overwrite the counter (slot initialization only)
    pub fn reset(&self, value: u64) {
        self.counter.store(value, Ordering::SeqCst);
    }

    /// Begin write operation - advance to the next odd value
    pub fn begin_write(&self) -> u64 {
        let next = next_odd(self.counter.load(Ordering::SeqCst));
        self.counter.store(next, Ordering::SeqCst);
        // Payload stores must not become visible before the odd value.
        fence(Ordering::SeqCst);
        next
    }

    /// Complete write operation - advance to the even value after `odd`
    pub fn end_write(&self, odd: u64) -> u64 {
        let next = odd.wrapping_add(1);
        self.counter.store(next, Ordering::SeqCst);
        next
    }

    /// Load used after a payload copy; the fence keeps the copy ahead of it.
    pub fn load_after_read(&self) -> u64 {
        fence(Ordering::Acquire);
        self.counter.load(Ordering::SeqCst)
    }
}

/// Check if sequence is stable (even)
pub fn is_stable(sequence: u64) -> bool {
    sequence % 2 == 0
}

/// Check if sequence indicates write in progress (odd)
pub fn is_writing(sequence: u64) -> bool {
    sequence % 2 == 1
}

/// Smallest odd value strictly greater than `sequence`.
///
/// From an odd value (a writer died mid-publish) this skips ahead by two so
/// the counter keeps increasing.
pub fn next_odd(sequence: u64) -> u64 {
    if is_stable(sequence) {
        sequence.wrapping_add(1)
    } else {
        sequence.wrapping_add(2)
    }
}
