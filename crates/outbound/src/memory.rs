use std::sync::atomic::{AtomicUsize, Ordering};

/// Running total of bytes held by live engine state: the shared UDP
/// receive buffers, the pending-UDP index and its timers, TCP slot/wait-
/// queue packets, and the serviced-query index including qbuf copies and
/// subscriber lists. Updated on insert/remove so reads are O(1) (§4.5).
#[derive(Debug, Default)]
pub struct MemoryAccounting {
    bytes: AtomicUsize,
}

impl MemoryAccounting {
    pub fn new() -> Self {
        Self {
            bytes: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, n: usize) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sub(&self, n: usize) {
        self.bytes.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn total(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }
}
