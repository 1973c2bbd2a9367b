//! Streaming pipeline: encoder and sender on the publishing side, delivery
//! bridge, tracker and receiver loop on the subscribing side.

pub mod bridge;
pub mod encoder;
pub mod receiver;
pub mod sender;
pub mod tracker;

pub use bridge::{BridgeStats, DeliveryBridge};
pub use encoder::FrameEncoder;
pub use receiver::{delivery_callback, ReceiverLoop, ReceiverReport};
pub use sender::{SenderLoop, SenderReport};
pub use tracker::{DeliveredFrame, DeliveryCounters, HealthSnapshot, RateWindow, StreamHealth};
