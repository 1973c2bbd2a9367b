//! Publisher-side loop: acquire, preview, encode, transmit, sleep.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{FrameSource, RawFrame};
use crate::display::{DisplaySink, HeadlessDisplay, Overlay};
use crate::error::Result;
use crate::pipeline::encoder::FrameEncoder;
use crate::pipeline::tracker::{RateWindow, DEFAULT_FPS_WINDOW};
use crate::transport::Publisher;
use crate::utils::unix_time_secs;
use crate::StreamConfig;

/// Totals reported when the sender loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderReport {
    pub frames_sent: u64,
    pub encode_failures: u64,
    pub send_failures: u64,
    pub bytes_sent: u64,
    /// Highest sequence number handed out, sent or not
    pub last_sequence: u64,
}

/// Acquire, encode and publish at a fixed cadence.
///
/// `V` is the optional local preview. Without [`with_preview`](Self::with_preview)
/// no preview is shown and the type parameter stays at its default.
pub struct SenderLoop<S, P, V = HeadlessDisplay> {
    source: S,
    publisher: P,
    encoder: FrameEncoder,
    topic: String,
    interval: Duration,
    next_sequence: u64,
    preview: Option<V>,
    capture_rate: RateWindow,
    report: SenderReport,
}

impl<S: FrameSource, P: Publisher> SenderLoop<S, P> {
    pub fn new(
        source: S,
        publisher: P,
        encoder: FrameEncoder,
        topic: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            publisher,
            encoder,
            topic: topic.into(),
            interval,
            next_sequence: 1,
            preview: None,
            capture_rate: RateWindow::new(DEFAULT_FPS_WINDOW),
            report: SenderReport::default(),
        }
    }

    pub fn from_config(source: S, publisher: P, config: &StreamConfig) -> Result<Self> {
        let encoder = FrameEncoder::new(config.compression_quality, config.keyframe_interval)?;
        Ok(Self::new(
            source,
            publisher,
            encoder,
            config.topic.clone(),
            config.target_send_interval(),
        ))
    }
}

impl<S: FrameSource, P: Publisher, V: DisplaySink> SenderLoop<S, P, V> {
    /// Show every captured frame locally before it is sent. A quit request
    /// from the preview stops the loop like a cancellation.
    pub fn with_preview<W: DisplaySink>(self, preview: W) -> SenderLoop<S, P, W> {
        SenderLoop {
            source: self.source,
            publisher: self.publisher,
            encoder: self.encoder,
            topic: self.topic,
            interval: self.interval,
            next_sequence: self.next_sequence,
            preview: Some(preview),
            capture_rate: self.capture_rate,
            report: self.report,
        }
    }

    /// Run until cancelled, until the preview asks to quit or until the
    /// frame source fails.
    ///
    /// Per-frame compression and transmission failures are logged and
    /// counted; only acquisition failures are returned. The source, the
    /// preview and the publisher are closed on every exit path.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SenderReport> {
        info!(topic = %self.topic, interval = ?self.interval, "Sender loop started");

        let outcome = loop {
            if cancel.is_cancelled() {
                info!("Sender loop cancelled");
                break Ok(());
            }
            if self.preview.as_mut().is_some_and(|p| p.poll_quit_requested()) {
                info!("Preview requested quit");
                break Ok(());
            }

            let started = Instant::now();
            if let Err(e) = self.step() {
                error!("Acquisition failed: {e}");
                break Err(e);
            }

            // No drift compensation: sleep whatever is left of this period.
            let remaining = self.interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sender loop cancelled");
                    break Ok(());
                }
                _ = tokio::time::sleep(remaining) => {}
            }
        };

        self.source.close();
        if let Some(preview) = self.preview.as_mut() {
            preview.close();
        }
        self.publisher.close();
        info!(
            sent = self.report.frames_sent,
            encode_failures = self.report.encode_failures,
            send_failures = self.report.send_failures,
            bytes = self.report.bytes_sent,
            "Sender loop stopped"
        );

        outcome.map(|()| self.report)
    }

    /// One iteration. Only an acquisition failure is returned.
    fn step(&mut self) -> Result<()> {
        let frame = self.source.next_frame()?;

        // The sequence is consumed even if the frame never leaves, so the
        // receiver sees the hole as loss.
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.report.last_sequence = sequence;

        self.show_preview(&frame, sequence);

        let envelope = match self.encoder.encode(&frame, sequence) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(sequence, "Dropping frame: {e}");
                self.report.encode_failures += 1;
                metrics::counter!("encode_failures").increment(1);
                return Ok(());
            }
        };

        let bytes = envelope.to_bytes();
        match self.publisher.publish(&self.topic, &bytes) {
            Ok(size) => {
                self.report.frames_sent += 1;
                self.report.bytes_sent += size as u64;
                metrics::counter!("frames_sent").increment(1);
                debug!(
                    keyframe = envelope.is_keyframe,
                    "Frame {sequence} sent ({size} bytes)"
                );
            }
            Err(e) => {
                warn!(sequence, "Send failed: {e}");
                self.report.send_failures += 1;
                metrics::counter!("send_failures").increment(1);
            }
        }
        Ok(())
    }

    fn show_preview(&mut self, frame: &RawFrame, sequence: u64) {
        let Some(preview) = self.preview.as_mut() else {
            return;
        };
        self.capture_rate.push(unix_time_secs());
        let overlay = Overlay {
            frame_number: sequence,
            fps: self.capture_rate.fps(),
            latency_ms: 0.0,
            lost: 0,
            payload_bytes: frame.data.len(),
            is_keyframe: self.encoder.is_keyframe(sequence),
        };
        if let Err(e) = preview.show(frame, &overlay) {
            warn!(sequence, "Preview failed: {e}");
            metrics::counter!("preview_failures").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TestPattern;
    use crate::error::StreamError;
    use crate::wire::WireEnvelope;
    use std::sync::{Arc, Mutex};

    /// Publisher that records every message and can refuse chosen sends.
    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        sent_at: Arc<Mutex<Vec<Instant>>>,
        refuse_every: Option<usize>,
        closed: Arc<Mutex<bool>>,
    }

    impl Publisher for Recorder {
        fn publish(&self, _topic: &str, payload: &[u8]) -> Result<usize> {
            self.sent_at.lock().unwrap().push(Instant::now());
            let mut sent = self.sent.lock().unwrap();
            let attempt = sent.len() + 1;
            sent.push(payload.to_vec());
            if self.refuse_every.is_some_and(|n| attempt % n == 0) {
                return Err(StreamError::Transmission("refused".into()));
            }
            Ok(payload.len())
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn sender<S: FrameSource>(source: S, publisher: Recorder) -> SenderLoop<S, Recorder> {
        SenderLoop::new(
            source,
            publisher,
            FrameEncoder::new(80, 5).unwrap(),
            "video",
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn end_of_stream_is_fatal_and_closes_everything() {
        let publisher = Recorder::default();
        let source = TestPattern::new(16, 16, 3).with_limit(10);
        let err = sender(source, publisher.clone())
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(*publisher.closed.lock().unwrap());

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 10);
        let envelopes: Vec<WireEnvelope> = sent
            .iter()
            .map(|b| WireEnvelope::from_bytes(b).unwrap())
            .collect();
        let sequences: Vec<u64> = envelopes.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
        let keyframes: Vec<u64> = envelopes
            .iter()
            .filter(|e| e.is_keyframe)
            .map(|e| e.sequence)
            .collect();
        assert_eq!(keyframes, vec![5, 10]);
        assert!(envelopes.iter().all(|e| e.quality == 80));
    }

    #[test]
    fn send_failures_do_not_stop_the_loop() {
        let publisher = Recorder {
            refuse_every: Some(2),
            ..Recorder::default()
        };
        let source = TestPattern::new(8, 8, 1).with_limit(6);
        let mut looped = sender(source, publisher);
        for _ in 0..6 {
            looped.step().unwrap();
        }

        let report = looped.report;
        assert_eq!(report.frames_sent, 3);
        assert_eq!(report.send_failures, 3);
        assert_eq!(report.last_sequence, 6);
    }

    struct Broken;

    impl FrameSource for Broken {
        fn next_frame(&mut self) -> Result<RawFrame> {
            // Geometry claims more bytes than the buffer holds.
            Ok(RawFrame::new(vec![0u8; 3], 16, 16, 3))
        }
    }

    #[test]
    fn compression_failures_skip_the_frame_but_use_the_sequence() {
        let mut looped = sender(Broken, Recorder::default());
        looped.step().unwrap();
        looped.step().unwrap();

        assert_eq!(looped.report.encode_failures, 2);
        assert_eq!(looped.report.frames_sent, 0);
        assert_eq!(looped.next_sequence, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_on_the_target_cadence() {
        let publisher = Recorder::default();
        let looped = SenderLoop::new(
            TestPattern::new(8, 8, 1).with_limit(5),
            publisher.clone(),
            FrameEncoder::new(80, 30).unwrap(),
            "video",
            Duration::from_millis(100),
        );

        let start = Instant::now();
        let err = looped.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.is_fatal());

        // Five full periods: the fifth frame's sleep ends before the source
        // reports end of stream. The paused clock may round a timer up by a tick.
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(500) && elapsed <= Duration::from_millis(505),
            "elapsed {elapsed:?}"
        );

        let sent_at = publisher.sent_at.lock().unwrap();
        assert_eq!(sent_at.len(), 5);
        assert_eq!(sent_at[0], start);
        for pair in sent_at.windows(2) {
            let spacing = pair[1] - pair[0];
            assert!(
                spacing >= Duration::from_millis(100) && spacing <= Duration::from_millis(101),
                "spacing {spacing:?}"
            );
        }
    }

    /// Preview sink that asks to quit once it has shown `quit_after` frames.
    #[derive(Clone, Default)]
    struct Preview {
        overlays: Arc<Mutex<Vec<Overlay>>>,
        closed: Arc<Mutex<bool>>,
        quit_after: usize,
    }

    impl DisplaySink for Preview {
        fn show(&mut self, frame: &RawFrame, overlay: &Overlay) -> Result<()> {
            assert_eq!(overlay.payload_bytes, frame.data.len());
            self.overlays.lock().unwrap().push(overlay.clone());
            Ok(())
        }

        fn poll_quit_requested(&mut self) -> bool {
            self.overlays.lock().unwrap().len() >= self.quit_after
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn preview_shows_every_frame_and_can_stop_the_loop() {
        let publisher = Recorder::default();
        let preview = Preview {
            quit_after: 3,
            ..Preview::default()
        };
        let looped = sender(TestPattern::new(8, 8, 3), publisher.clone())
            .with_preview(preview.clone());

        let report = looped.run(CancellationToken::new()).await.unwrap();

        assert_eq!(report.frames_sent, 3);
        assert!(*preview.closed.lock().unwrap());
        assert!(*publisher.closed.lock().unwrap());

        let overlays = preview.overlays.lock().unwrap();
        let numbers: Vec<u64> = overlays.iter().map(|o| o.frame_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(overlays.iter().all(|o| o.lost == 0 && !o.is_keyframe));
    }

    #[tokio::test]
    async fn cancellation_stops_cleanly() {
        let publisher = Recorder::default();
        let cancel = CancellationToken::new();
        let looped = SenderLoop::new(
            TestPattern::new(8, 8, 3),
            publisher.clone(),
            FrameEncoder::new(80, 30).unwrap(),
            "video",
            Duration::from_millis(5),
        );

        let handle = tokio::spawn(looped.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let report = handle.await.unwrap().unwrap();
        assert!(report.frames_sent >= 1);
        assert_eq!(report.frames_sent, report.last_sequence);
        assert!(*publisher.closed.lock().unwrap());
    }
}
