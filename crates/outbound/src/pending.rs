use std::collections::BTreeMap;
use std::mem::size_of;
use std::net::SocketAddr;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::memory::MemoryAccounting;

/// Compound key a pending UDP request is demultiplexed on (§3): the
/// transaction id and the remote address the reply must come from.
pub type PendingKey = (u16, SocketAddr);

/// One outstanding UDP request's result channel. The "timer" of §4.2 is
/// not stored here: it lives as a `sleep_until` race in the sender's own
/// task (see [`crate::udp_pool::UdpPortPool::send`]), so cancelling it is
/// just dropping that task's future, not a separate bookkeeping step.
type Slot = oneshot::Sender<Bytes>;

/// Sorted index of outstanding UDP requests, ordered by (id, remote-addr)
/// exactly as §4.2 specifies — a `BTreeMap` gives the same O(log n) bound
/// as the source's red-black tree without a custom comparator.
pub struct PendingTable {
    inner: Mutex<BTreeMap<PendingKey, Slot>>,
    memory: std::sync::Arc<MemoryAccounting>,
}

/// Approximate per-entry overhead charged against the memory budget: the
/// key plus the channel's control block. Not exact, just O(1) and stable.
const PENDING_ENTRY_OVERHEAD: usize = size_of::<PendingKey>() + 64;

impl PendingTable {
    pub fn new(memory: std::sync::Arc<MemoryAccounting>) -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            memory,
        }
    }

    /// Insert a fresh entry. Invariant I1 (§8) is enforced by the caller:
    /// the port/ID pool only calls this after confirming the key is free.
    pub fn insert(&self, key: PendingKey, tx: Slot) {
        self.inner.lock().insert(key, tx);
        self.memory.add(PENDING_ENTRY_OVERHEAD);
    }

    pub fn contains(&self, key: &PendingKey) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Full unlink: used on reply receipt and on timer fire. The caller is
    /// responsible for delivering the outcome to the returned channel.
    pub fn remove(&self, key: &PendingKey) -> Option<Slot> {
        let removed = self.inner.lock().remove(key);
        if removed.is_some() {
            self.memory.sub(PENDING_ENTRY_OVERHEAD);
        }
        removed
    }

    /// Map-only removal, used when walking the table at shutdown: the
    /// caller has already detached (dropped) every owning task, so there
    /// is no channel left to notify and no separate timer to cancel. This
    /// mirrors the source's `pending_delete(NULL, ...)` fast path (§9).
    pub fn remove_detached(&self, key: &PendingKey) {
        if self.inner.lock().remove(key).is_some() {
            self.memory.sub(PENDING_ENTRY_OVERHEAD);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every entry, in (id, addr) order, dropping their channels.
    /// Used by engine shutdown.
    pub fn drain_all(&self) -> Vec<PendingKey> {
        let mut guard = self.inner.lock();
        let keys: Vec<PendingKey> = guard.keys().copied().collect();
        guard.clear();
        self.memory.sub(PENDING_ENTRY_OVERHEAD * keys.len());
        keys
    }
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod pending_tests;
