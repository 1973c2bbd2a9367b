//! Loss, latency and frame-rate tracking for one received stream.
//!
//! Work is split across the two receiver contexts:
//!
//! - [`DeliveryCounters`] runs inside the transport's delivery callback. It
//!   sees every envelope that arrives, so gap-based loss is measured before
//!   the latest-wins bridge can drop anything. It is lock-free.
//! - [`StreamHealth`] runs inside the receiver loop. It owns the arrival-time
//!   window used for FPS and needs no synchronization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use crate::wire::WireEnvelope;

/// Default number of arrival timestamps kept for the FPS estimate.
pub const DEFAULT_FPS_WINDOW: usize = 30;

/// `last_sequence` value before any frame arrived. Sequences start at 1.
const NO_SEQUENCE: u64 = 0;

/// Decoded envelope plus receive-side measurements, handed from the delivery
/// callback to the receiver loop.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredFrame {
    pub envelope: WireEnvelope,
    /// Local wall-clock seconds at delivery
    pub received_at: f64,
    /// `received_at - sent_at`; negative when clocks disagree
    pub latency: f64,
    /// Sequence numbers missing right before this frame
    pub gap: u64,
}

/// Per-stream counters shared between the delivery callback and the
/// receiver loop.
#[derive(Default)]
pub struct DeliveryCounters {
    received: CachePadded<AtomicU64>,
    lost: CachePadded<AtomicU64>,
    late: CachePadded<AtomicU64>,
    malformed: CachePadded<AtomicU64>,
    last_sequence: CachePadded<AtomicU64>,
}

/// Point-in-time copy of [`DeliveryCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub received: u64,
    pub lost: u64,
    pub late: u64,
    pub malformed: u64,
}

impl DeliveryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arrival of `sequence` and return the gap in front of it.
    ///
    /// The high-water mark only moves forward. A duplicate or reordered
    /// arrival yields a zero gap and counts as late instead of rewinding
    /// the mark, which would inflate every gap after it.
    pub fn observe(&self, sequence: u64) -> u64 {
        self.received.fetch_add(1, Ordering::Relaxed);

        let previous = self.last_sequence.fetch_max(sequence, Ordering::AcqRel);
        if previous == NO_SEQUENCE {
            return 0;
        }
        if sequence <= previous {
            self.late.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        let gap = sequence - previous - 1;
        if gap > 0 {
            self.lost.fetch_add(gap, Ordering::Relaxed);
        }
        gap
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        match self.last_sequence.load(Ordering::Acquire) {
            NO_SEQUENCE => None,
            s => Some(s),
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Sliding window of arrival times; oldest entry is overwritten first.
pub struct RateWindow {
    arrivals: HeapRb<f64>,
}

impl RateWindow {
    /// `capacity` below 2 cannot produce a rate and is raised to 2.
    pub fn new(capacity: usize) -> Self {
        Self {
            arrivals: HeapRb::new(capacity.max(2)),
        }
    }

    pub fn push(&mut self, arrival: f64) {
        self.arrivals.push_overwrite(arrival);
    }

    pub fn len(&self) -> usize {
        self.arrivals.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }

    /// `(n - 1) / (newest - oldest)`, or 0 with fewer than two samples or a
    /// non-positive span.
    pub fn fps(&self) -> f64 {
        let n = self.len();
        if n < 2 {
            return 0.0;
        }
        let (Some(first), Some(last)) = (self.arrivals.iter().next(), self.arrivals.iter().last())
        else {
            return 0.0;
        };
        let span = last - first;
        if span <= 0.0 {
            return 0.0;
        }
        (n - 1) as f64 / span
    }
}

/// Per-frame output of the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSnapshot {
    pub lost_gap: u64,
    pub lost_total: u64,
    pub fps: f64,
    /// Seconds
    pub latency: f64,
}

/// Receiver-owned stream state: shared counters plus the local FPS window.
pub struct StreamHealth {
    counters: Arc<DeliveryCounters>,
    window: RateWindow,
}

impl StreamHealth {
    pub fn new(counters: Arc<DeliveryCounters>, fps_window_size: usize) -> Self {
        Self {
            counters,
            window: RateWindow::new(fps_window_size),
        }
    }

    pub fn record(&mut self, frame: &DeliveredFrame) -> HealthSnapshot {
        self.window.push(frame.received_at);
        HealthSnapshot {
            lost_gap: frame.gap,
            lost_total: self.counters.lost(),
            fps: self.window.fps(),
            latency: frame.latency,
        }
    }

    pub fn counters(&self) -> &Arc<DeliveryCounters> {
        &self.counters
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}
