//! In-process bus: one delivery thread per subscription, fed by an
//! unbounded flume channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use flume::{RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::error::Result;
use crate::transport::{DeliveryCallback, Publisher, Subscriber, Subscription};

/// How often an idle delivery thread re-checks its stop flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

type Topics = HashMap<String, Vec<(u64, Sender<Bytes>)>>;

/// Cloneable handle to a shared in-process topic table.
#[derive(Clone, Default)]
pub struct LocalBus {
    topics: Arc<Mutex<Topics>>,
    next_id: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map_or(0, Vec::len)
    }

    fn unregister(topics: &Mutex<Topics>, topic: &str, id: u64) {
        let mut topics = topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

impl Publisher for LocalBus {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize> {
        let bytes = Bytes::copy_from_slice(payload);
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = topics.get_mut(topic) {
            // Drop subscribers whose delivery thread is gone.
            subs.retain(|(_, tx)| tx.send(bytes.clone()).is_ok());
            trace!(topic, subscribers = subs.len(), bytes = payload.len(), "published");
        }
        Ok(payload.len())
    }
}

impl Subscriber for LocalBus {
    fn subscribe(&self, topic: &str, callback: DeliveryCallback) -> Result<Subscription> {
        let (tx, rx) = flume::unbounded::<Bytes>();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            topics.entry(topic.to_string()).or_default().push((id, tx));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let stop = stop.clone();
            let topic = topic.to_string();
            thread::Builder::new()
                .name(format!("delivery-{topic}"))
                .spawn(move || {
                    debug!(%topic, "delivery thread started");
                    while !stop.load(Ordering::Acquire) {
                        match rx.recv_timeout(IDLE_POLL) {
                            Ok(bytes) => callback(&bytes[..]),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    debug!(%topic, "delivery thread stopped");
                })?
        };

        let on_close: Box<dyn FnOnce() + Send> = {
            let topics = self.topics.clone();
            let topic = topic.to_string();
            Box::new(move || LocalBus::unregister(&topics, &topic, id))
        };

        Ok(Subscription::new(topic, stop, worker, Some(on_close)))
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("LocalBus")
            .field("topics", &topics.keys().collect::<Vec<_>>())
            .finish()
    }
}
