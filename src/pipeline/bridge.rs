//! Latest-wins hand-off between the delivery callback and the receiver loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender, TrySendError};

/// Capacity-1 slot. `offer` never blocks: a pending item is evicted and
/// replaced. `take` blocks up to a timeout.
///
/// Backed by a `flume::bounded(1)` channel, whose internal lock covers only
/// install / evict / take. Share it behind an `Arc`.
pub struct DeliveryBridge<T> {
    tx: Sender<T>,
    rx: Receiver<T>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    offered: AtomicU64,
    taken: AtomicU64,
    evicted: AtomicU64,
}

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub offered: u64,
    pub taken: u64,
    pub evicted: u64,
}

impl<T> DeliveryBridge<T> {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self {
            tx,
            rx,
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: install `item`, evicting whatever is still pending.
    ///
    /// Returns `true` if a stale item was evicted.
    pub fn offer(&self, item: T) -> bool {
        self.stats.offered.fetch_add(1, Ordering::Relaxed);

        let mut item = item;
        let mut evicted = false;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    // The consumer may win the race and empty the slot first;
                    // either way the next try_send finds room.
                    if self.rx.try_recv().is_ok() {
                        evicted = true;
                        self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                    }
                }
                // Both ends live in `self`, the channel cannot disconnect.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    /// Consumer: wait up to `timeout` for an item. `None` means nothing
    /// arrived in time.
    pub fn take(&self, timeout: Duration) -> Option<T> {
        let item = self.rx.recv_timeout(timeout).ok()?;
        self.stats.taken.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    /// Consumer: non-blocking variant of [`take`](Self::take).
    pub fn try_take(&self) -> Option<T> {
        let item = self.rx.try_recv().ok()?;
        self.stats.taken.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            offered: self.stats.offered.load(Ordering::Relaxed),
            taken: self.stats.taken.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for DeliveryBridge<T> {
    fn default() -> Self {
        Self::new()
    }
}
