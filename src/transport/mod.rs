//! Publish/subscribe transport seam.
//!
//! The pipeline only needs two capabilities: push bytes to a topic, and have
//! a callback invoked with bytes arriving on a topic. Callbacks run on a
//! transport-owned thread, never on the caller's.

pub mod local;
pub mod udp;

pub use local::LocalBus;
pub use udp::{UdpPublisher, UdpSubscriber};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::error::Result;

/// Invoked once per delivered message, from the transport's delivery thread.
pub type DeliveryCallback = Box<dyn Fn(&[u8]) + Send + 'static>;

pub trait Publisher {
    /// Send `payload` to every current subscriber of `topic`.
    ///
    /// Best effort: success means the transport accepted the bytes, not that
    /// anyone received them. Returns the number of payload bytes sent.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize>;

    fn close(&mut self) {}
}

pub trait Subscriber {
    /// Start delivering messages on `topic` to `callback`.
    fn subscribe(&self, topic: &str, callback: DeliveryCallback) -> Result<Subscription>;
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize> {
        (**self).publish(topic, payload)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Handle to an active subscription. Dropping it stops delivery and joins
/// the delivery thread.
pub struct Subscription {
    topic: String,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(
        topic: &str,
        stop: Arc<AtomicBool>,
        worker: JoinHandle<()>,
        on_close: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            stop,
            worker: Some(worker),
            on_close,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(topic = %self.topic, "delivery thread panicked");
            } else {
                debug!(topic = %self.topic, "subscription closed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}
