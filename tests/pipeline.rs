use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use framecast::capture::{RawFrame, TestPattern};
use framecast::display::{DisplaySink, Overlay};
use framecast::pipeline::{
    delivery_callback, DeliveryBridge, DeliveryCounters, FrameEncoder, ReceiverLoop, SenderLoop,
};
use framecast::transport::{LocalBus, Publisher, UdpPublisher, UdpSubscriber};
use framecast::{ReceiverConfig, StreamConfig, StreamError, WireEnvelope};

/// Publisher that keeps every message instead of sending it.
#[derive(Clone, Default)]
struct Scripted {
    messages: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Publisher for Scripted {
    fn publish(&self, _topic: &str, payload: &[u8]) -> framecast::Result<usize> {
        self.messages.lock().unwrap().push(payload.to_vec());
        Ok(payload.len())
    }
}

/// Display that records overlays and can ask to quit after `quit_after` frames.
#[derive(Clone, Default)]
struct Recording {
    overlays: Arc<Mutex<Vec<Overlay>>>,
    sizes: Arc<Mutex<Vec<(u32, u32, u8)>>>,
    quit_after: Option<usize>,
}

impl DisplaySink for Recording {
    fn show(&mut self, frame: &RawFrame, overlay: &Overlay) -> framecast::Result<()> {
        self.overlays.lock().unwrap().push(overlay.clone());
        self.sizes
            .lock()
            .unwrap()
            .push((frame.width, frame.height, frame.channels));
        Ok(())
    }

    fn poll_quit_requested(&mut self) -> bool {
        self.quit_after
            .is_some_and(|n| self.overlays.lock().unwrap().len() >= n)
    }
}

fn receiver_config() -> ReceiverConfig {
    ReceiverConfig {
        bridge_take_timeout_secs: 0.01,
        fps_window_size: 30,
    }
}

fn envelope(sequence: u64) -> Vec<u8> {
    let frame = RawFrame::new(vec![128u8; 16 * 16 * 3], 16, 16, 3);
    FrameEncoder::new(80, 30)
        .unwrap()
        .encode(&frame, sequence)
        .unwrap()
        .to_bytes()
}

#[tokio::test]
async fn missing_sequence_shows_up_as_one_lost_frame() {
    let publisher = Scripted::default();
    let stream = StreamConfig {
        topic: "video".into(),
        keyframe_interval: 5,
        compression_quality: 80,
        target_send_interval_secs: 0.001,
    };
    let source = TestPattern::new(32, 24, 3).with_limit(10);
    let sender = SenderLoop::from_config(source, publisher.clone(), &stream).unwrap();
    let err = sender.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, StreamError::Acquisition(_)));

    let messages = publisher.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 10);
    let tenth = WireEnvelope::from_bytes(&messages[9]).unwrap();
    assert_eq!(tenth.sequence, 10);
    assert!(tenth.is_keyframe);
    assert_eq!(tenth.quality, 80);

    let counters = Arc::new(DeliveryCounters::new());
    let bridge = Arc::new(DeliveryBridge::new());
    let callback = delivery_callback(counters.clone(), bridge.clone());
    let display = Recording::default();
    let mut receiver =
        ReceiverLoop::new(bridge.clone(), counters.clone(), display.clone(), &receiver_config());

    // Frame 4 never arrives.
    for sequence in [1u64, 2, 3, 5, 6] {
        callback(&messages[(sequence - 1) as usize][..]);
        let frame = bridge.try_take().unwrap();
        receiver.process(frame);
    }

    let overlays = display.overlays.lock().unwrap();
    let numbers: Vec<u64> = overlays.iter().map(|o| o.frame_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 5, 6]);
    let lost: Vec<u64> = overlays.iter().map(|o| o.lost).collect();
    assert_eq!(lost, vec![0, 0, 0, 1, 1]);
    let keyframes: Vec<bool> = overlays.iter().map(|o| o.is_keyframe).collect();
    assert_eq!(keyframes, vec![false, false, false, true, false]);

    assert!(display
        .sizes
        .lock()
        .unwrap()
        .iter()
        .all(|&size| size == (32, 24, 3)));
    assert_eq!(counters.lost(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_bus_end_to_end() {
    let bus = LocalBus::new();
    let display = Recording::default();
    let receiver =
        ReceiverLoop::subscribe(&bus, "video", display.clone(), &receiver_config()).unwrap();
    assert_eq!(bus.subscriber_count("video"), 1);

    let cancel = CancellationToken::new();
    let receiving = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || receiver.run(&cancel))
    };

    let sender = SenderLoop::new(
        TestPattern::new(32, 32, 3).with_limit(20),
        bus.clone(),
        FrameEncoder::new(70, 10).unwrap(),
        "video",
        Duration::from_millis(5),
    );
    let err = sender.run(cancel.clone()).await.unwrap_err();
    assert!(err.is_fatal());

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    let report = receiving.await.unwrap();

    assert_eq!(report.received, 20);
    assert_eq!(report.lost, 0);
    assert_eq!(report.malformed, 0);
    assert_eq!(report.decode_failures, 0);
    assert!(report.displayed >= 1);
    assert_eq!(report.displayed + report.coalesced, report.received);

    // Latest-wins: the final frame is never the one dropped.
    let overlays = display.overlays.lock().unwrap();
    assert_eq!(overlays.last().unwrap().frame_number, 20);

    // The subscription is released when the loop exits.
    assert_eq!(bus.subscriber_count("video"), 0);
}

#[test]
fn malformed_messages_are_counted_not_displayed() {
    let bus = LocalBus::new();
    let display = Recording {
        quit_after: Some(1),
        ..Recording::default()
    };
    let receiver =
        ReceiverLoop::subscribe(&bus, "video", display.clone(), &receiver_config()).unwrap();

    bus.publish("video", b"definitely not protobuf").unwrap();
    bus.publish("video", &envelope(1)).unwrap();

    let report = receiver.run(&CancellationToken::new());
    assert_eq!(report.malformed, 1);
    assert_eq!(report.received, 1);
    assert_eq!(report.displayed, 1);
    assert_eq!(display.overlays.lock().unwrap()[0].frame_number, 1);
}

#[test]
fn other_topics_are_ignored() {
    let bus = LocalBus::new();
    let display = Recording {
        quit_after: Some(1),
        ..Recording::default()
    };
    let receiver =
        ReceiverLoop::subscribe(&bus, "video", display.clone(), &receiver_config()).unwrap();

    bus.publish("audio", &envelope(7)).unwrap();
    bus.publish("video", &envelope(1)).unwrap();

    let report = receiver.run(&CancellationToken::new());
    assert_eq!(report.received, 1);
    assert_eq!(display.overlays.lock().unwrap()[0].frame_number, 1);
}

#[test]
fn udp_end_to_end_tracks_loss() {
    let subscriber = UdpSubscriber::bind("127.0.0.1:0").unwrap();
    let addr = subscriber.local_addr().unwrap();
    let publisher = UdpPublisher::new("127.0.0.1:0", &addr.to_string()).unwrap();

    let display = Recording::default();
    let receiver =
        ReceiverLoop::subscribe(&subscriber, "video", display.clone(), &receiver_config()).unwrap();

    let cancel = CancellationToken::new();
    let receiving = {
        let cancel = cancel.clone();
        thread::spawn(move || receiver.run(&cancel))
    };

    for sequence in [1u64, 2, 4] {
        publisher.publish("video", &envelope(sequence)).unwrap();
        thread::sleep(Duration::from_millis(20));
    }
    thread::sleep(Duration::from_millis(300));
    cancel.cancel();
    let report = receiving.join().unwrap();

    assert_eq!(report.received, 3);
    assert_eq!(report.lost, 1);
    assert_eq!(
        display.overlays.lock().unwrap().last().unwrap().frame_number,
        4
    );
}
