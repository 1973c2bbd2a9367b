//! Subscriber side: the delivery callback and the receiver loop.
//!
//! The callback runs on the transport's thread and does only cheap work:
//! parse the envelope, update the atomic loss counters and drop the result
//! into the [`DeliveryBridge`]. Decoding, FPS tracking and display happen in
//! [`ReceiverLoop::run`], on whatever thread calls it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::RawFrame;
use crate::codec;
use crate::display::{DisplaySink, Overlay};
use crate::error::{Result, StreamError};
use crate::pipeline::bridge::DeliveryBridge;
use crate::pipeline::tracker::{DeliveredFrame, DeliveryCounters, StreamHealth};
use crate::transport::{DeliveryCallback, Subscriber, Subscription};
use crate::utils::unix_time_secs;
use crate::wire::WireEnvelope;
use crate::ReceiverConfig;

/// Build the callback a transport invokes for every message on the topic.
pub fn delivery_callback(
    counters: Arc<DeliveryCounters>,
    bridge: Arc<DeliveryBridge<DeliveredFrame>>,
) -> DeliveryCallback {
    Box::new(move |bytes| {
        let received_at = unix_time_secs();

        let envelope = match WireEnvelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                counters.record_malformed();
                metrics::counter!("frames_malformed").increment(1);
                warn!("Discarding message: {e}");
                return;
            }
        };

        let gap = counters.observe(envelope.sequence);
        metrics::counter!("frames_received").increment(1);
        if gap > 0 {
            metrics::counter!("frames_lost").increment(gap);
            warn!(
                "{gap} frames lost before {} (total: {})",
                envelope.sequence,
                counters.lost()
            );
        }

        let latency = received_at - envelope.sent_at;
        let frame = DeliveredFrame {
            envelope,
            received_at,
            latency,
            gap,
        };
        if bridge.offer(frame) {
            metrics::counter!("frames_coalesced").increment(1);
        }
    })
}

/// Totals reported when the receiver loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverReport {
    pub displayed: u64,
    pub decode_failures: u64,
    pub display_failures: u64,
    /// Envelopes that reached the delivery callback and parsed
    pub received: u64,
    pub lost: u64,
    pub late: u64,
    pub malformed: u64,
    /// Frames replaced in the bridge before the loop got to them
    pub coalesced: u64,
}

pub struct ReceiverLoop<D> {
    bridge: Arc<DeliveryBridge<DeliveredFrame>>,
    health: StreamHealth,
    display: D,
    take_timeout: Duration,
    subscription: Option<Subscription>,
    report: ReceiverReport,
}

impl<D: DisplaySink> ReceiverLoop<D> {
    /// Loop over an existing bridge. Whoever feeds the bridge must also
    /// update `counters`, typically via [`delivery_callback`].
    pub fn new(
        bridge: Arc<DeliveryBridge<DeliveredFrame>>,
        counters: Arc<DeliveryCounters>,
        display: D,
        config: &ReceiverConfig,
    ) -> Self {
        Self {
            bridge,
            health: StreamHealth::new(counters, config.fps_window_size),
            display,
            take_timeout: config.bridge_take_timeout(),
            subscription: None,
            report: ReceiverReport::default(),
        }
    }

    /// Subscribe to `topic` and wire the delivery callback into a fresh
    /// bridge. The subscription is released when the loop exits.
    pub fn subscribe<S: Subscriber + ?Sized>(
        subscriber: &S,
        topic: &str,
        display: D,
        config: &ReceiverConfig,
    ) -> Result<Self> {
        let counters = Arc::new(DeliveryCounters::new());
        let bridge = Arc::new(DeliveryBridge::new());
        let subscription =
            subscriber.subscribe(topic, delivery_callback(counters.clone(), bridge.clone()))?;
        info!(topic, "Subscribed");

        let mut receiver = Self::new(bridge, counters, display, config);
        receiver.subscription = Some(subscription);
        Ok(receiver)
    }

    /// Run until cancelled or until the display asks to quit.
    ///
    /// The frame being processed when the stop arrives is always finished.
    pub fn run(mut self, cancel: &CancellationToken) -> ReceiverReport {
        info!(timeout = ?self.take_timeout, "Receiver loop started");

        loop {
            if cancel.is_cancelled() {
                info!("Receiver loop cancelled");
                break;
            }
            if self.display.poll_quit_requested() {
                info!("Display requested quit");
                break;
            }
            let Some(frame) = self.bridge.take(self.take_timeout) else {
                continue;
            };
            self.process(frame);
        }

        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
        self.display.close();

        let counters = self.health.counters().snapshot();
        let report = ReceiverReport {
            received: counters.received,
            lost: counters.lost,
            late: counters.late,
            malformed: counters.malformed,
            coalesced: self.bridge.stats().evicted,
            ..self.report
        };
        info!(
            displayed = report.displayed,
            received = report.received,
            lost = report.lost,
            decode_failures = report.decode_failures,
            "Receiver loop stopped"
        );
        report
    }

    /// Decode, track and display one delivered frame. Failures are logged and
    /// counted, never propagated.
    pub fn process(&mut self, frame: DeliveredFrame) {
        let start = Instant::now();
        let pixels = match decode_payload(&frame.envelope) {
            Ok(pixels) => pixels,
            Err(e) => {
                warn!(sequence = frame.envelope.sequence, "Skipping frame: {e}");
                self.report.decode_failures += 1;
                metrics::counter!("decode_failures").increment(1);
                return;
            }
        };
        metrics::histogram!("decode_time_us").record(start.elapsed().as_micros() as f64);

        let health = self.health.record(&frame);
        metrics::histogram!("frame_latency_ms").record(health.latency * 1000.0);
        metrics::gauge!("receive_fps").set(health.fps);

        let overlay = Overlay::new(&frame.envelope, &health);
        debug!(
            "Frame {} received | Latency {:.1} ms | FPS {:.1}",
            overlay.frame_number, overlay.latency_ms, overlay.fps
        );

        match self.display.show(&pixels, &overlay) {
            Ok(()) => self.report.displayed += 1,
            Err(e) => {
                warn!(sequence = frame.envelope.sequence, "Display error: {e}");
                self.report.display_failures += 1;
            }
        }
    }

    pub fn display(&self) -> &D {
        &self.display
    }
}

fn decode_payload(envelope: &WireEnvelope) -> Result<RawFrame> {
    if envelope.encoding != codec::JPEG {
        return Err(StreamError::Decode(format!(
            "unsupported encoding {:?}",
            envelope.encoding
        )));
    }
    codec::decode_jpeg(&envelope.payload)
}
