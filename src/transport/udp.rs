//! UDP transport: one datagram per message.
//!
//! # Wire format
//!
//! ```text
//! ┌──────────────┬──────────────────┬─────────────────────┐
//! │ topic_len u8 │ topic (utf-8)    │ payload (envelope)  │
//! └──────────────┴──────────────────┴─────────────────────┘
//! ```
//!
//! Subscribers silently ignore datagrams for other topics. Messages that do
//! not fit a single datagram are refused; nothing is fragmented or
//! retransmitted.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::error::{Result, StreamError};
use crate::transport::{DeliveryCallback, Publisher, Subscriber, Subscription};

/// Largest datagram we send; stays under the 65 507-byte IPv4 UDP limit.
pub const MAX_DATAGRAM_SIZE: usize = 65_000;

/// Receive timeout, bounds how long a stopped subscription lingers.
const RECV_POLL: Duration = Duration::from_millis(100);

/// Prefix `payload` with the topic header.
pub fn frame_datagram(topic: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let topic_len = u8::try_from(topic.len())
        .map_err(|_| StreamError::Transmission(format!("topic too long: {}", topic.len())))?;
    let total = 1 + topic.len() + payload.len();
    if total > MAX_DATAGRAM_SIZE {
        return Err(StreamError::Transmission(format!(
            "message too large: {total} bytes (max {MAX_DATAGRAM_SIZE})"
        )));
    }

    let mut datagram = Vec::with_capacity(total);
    datagram.push(topic_len);
    datagram.extend_from_slice(topic.as_bytes());
    datagram.extend_from_slice(payload);
    Ok(datagram)
}

/// Split a datagram into `(topic, payload)`; `None` if the header is cut short
/// or the topic is not utf-8.
pub fn parse_datagram(datagram: &[u8]) -> Option<(&str, &[u8])> {
    let (&topic_len, rest) = datagram.split_first()?;
    let topic_len = topic_len as usize;
    if rest.len() < topic_len {
        return None;
    }
    let (topic, payload) = rest.split_at(topic_len);
    Some((std::str::from_utf8(topic).ok()?, payload))
}

/// Sends each message as a datagram to a fixed peer.
pub struct UdpPublisher {
    socket: Option<UdpSocket>,
    peer: SocketAddr,
}

impl UdpPublisher {
    pub fn new(bind: &str, peer: &str) -> Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        let peer = resolve(peer)?;
        info!(local = %socket.local_addr()?, %peer, "UDP publisher ready");
        Ok(Self {
            socket: Some(socket),
            peer,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| StreamError::Transmission("publisher closed".into()))?;
        Ok(socket.local_addr()?)
    }
}

impl Publisher for UdpPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| StreamError::Transmission("publisher closed".into()))?;
        let datagram = frame_datagram(topic, payload)?;
        socket
            .send_to(&datagram, self.peer)
            .map_err(|e| StreamError::Transmission(e.to_string()))?;
        Ok(payload.len())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(peer = %self.peer, "UDP publisher closed");
        }
    }
}

/// Listens on a local address and dispatches datagrams by topic.
pub struct UdpSubscriber {
    socket: UdpSocket,
}

impl UdpSubscriber {
    pub fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_POLL))?;
        info!(local = %socket.local_addr()?, "UDP subscriber bound");
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Subscriber for UdpSubscriber {
    fn subscribe(&self, topic: &str, callback: DeliveryCallback) -> Result<Subscription> {
        let socket = self.socket.try_clone()?;
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let stop = stop.clone();
            let topic = topic.to_string();
            thread::Builder::new()
                .name(format!("udp-{topic}"))
                .spawn(move || receive_loop(socket, &topic, &stop, callback))?
        };

        Ok(Subscription::new(topic, stop, worker, None))
    }
}

fn receive_loop(socket: UdpSocket, topic: &str, stop: &AtomicBool, callback: DeliveryCallback) {
    let mut buf = vec![0u8; 65_536];
    while !stop.load(Ordering::Acquire) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => {
                warn!(%topic, "UDP receive error: {e}");
                continue;
            }
        };

        match parse_datagram(&buf[..len]) {
            Some((t, payload)) if t == topic => callback(payload),
            Some((other, _)) => trace!(%from, topic = other, "ignoring datagram"),
            None => debug!(%from, len, "dropping datagram with bad header"),
        }
    }
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| StreamError::Config(format!("cannot resolve {addr}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn datagram_header_roundtrip() {
        let datagram = frame_datagram("camera/front", b"payload").unwrap();
        assert_eq!(datagram[0] as usize, "camera/front".len());
        assert_eq!(
            parse_datagram(&datagram),
            Some(("camera/front", &b"payload"[..]))
        );
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert_eq!(parse_datagram(&[]), None);
        assert_eq!(parse_datagram(&[10, b'a', b'b']), None);
    }

    #[test]
    fn oversized_messages_are_transmission_failures() {
        let payload = vec![0u8; MAX_DATAGRAM_SIZE];
        assert!(matches!(
            frame_datagram("t", &payload),
            Err(StreamError::Transmission(_))
        ));
        let topic = "x".repeat(300);
        assert!(frame_datagram(&topic, b"").is_err());
    }

    #[test]
    fn loopback_delivery() {
        let subscriber = UdpSubscriber::bind("127.0.0.1:0").unwrap();
        let addr = subscriber.local_addr().unwrap();

        let (tx, rx) = mpsc::channel();
        let _sub = subscriber
            .subscribe(
                "video",
                Box::new(move |payload| {
                    let _ = tx.send(payload.to_vec());
                }),
            )
            .unwrap();

        let mut publisher = UdpPublisher::new("127.0.0.1:0", &addr.to_string()).unwrap();
        publisher.publish("other", b"skip me").unwrap();
        assert_eq!(publisher.publish("video", b"hello").unwrap(), 5);

        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, b"hello");

        publisher.close();
        assert!(matches!(
            publisher.publish("video", b"late"),
            Err(StreamError::Transmission(_))
        ));
    }
}
