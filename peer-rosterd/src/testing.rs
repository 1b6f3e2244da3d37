//! Test doubles shared by unit tests across modules

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use shared::types::{PeerAddresses, PeerDescriptor, PeerStatus, PeerSummary};
use crate::peer::observer::RosterObserver;
use crate::validator::{CertificateValidator, ValidateFuture};

pub fn descriptor(name: &str, port: u16, txt: &[(&str, &str)]) -> PeerDescriptor {
    PeerDescriptor {
        name: name.to_string(),
        ipv4: Some(Ipv4Addr::LOCALHOST),
        ipv6: None,
        port,
        txt: txt
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
    }
}

/// Announcement of a real peer on localhost. The hostname is the first
/// label of `name` with `-host` appended.
pub fn real_peer(name: &str, port: u16) -> PeerDescriptor {
    let label = name.split('.').next().unwrap_or(name);
    let hostname = format!("{}-host", label);
    descriptor(name, port, &[("type", "real"), ("hostname", &hostname)])
}

pub struct StaticValidator {
    accept: bool,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl StaticValidator {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self { accept: true, payloads: Mutex::new(Vec::new()) })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self { accept: false, payloads: Mutex::new(Vec::new()) })
    }

    /// Every payload presented so far
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

impl CertificateValidator for StaticValidator {
    fn validate<'a>(
        &'a self,
        _hostname: &'a str,
        _addresses: &'a PeerAddresses,
        payload: &'a [u8],
    ) -> ValidateFuture<'a> {
        self.payloads.lock().unwrap().push(payload.to_vec());
        let accept = self.accept;
        Box::pin(async move { accept })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Added(String),
    Removed(String),
    Status(String, PeerStatus),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl RosterObserver for RecordingObserver {
    fn on_peer_added(&self, peer: &PeerSummary) {
        self.events.lock().unwrap().push(Event::Added(peer.id.clone()));
    }

    fn on_peer_removed(&self, id: &str) {
        self.events.lock().unwrap().push(Event::Removed(id.to_string()));
    }

    fn on_peer_status_changed(&self, id: &str, status: PeerStatus) {
        self.events.lock().unwrap().push(Event::Status(id.to_string(), status));
    }
}

/// Datagram peer on localhost. Every request's source address is reported on
/// the returned channel; from the `answer_from`-th request on (1-based) the
/// peer replies with `reply`. With `reply == None` it never answers.
pub async fn spawn_datagram_peer(
    reply: Option<&'static [u8]>,
    answer_from: usize,
) -> (SocketAddr, mpsc::UnboundedReceiver<SocketAddr>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let mut count = 0usize;
        while let Ok((_, from)) = socket.recv_from(&mut buf).await {
            count += 1;
            let _ = tx.send(from);
            if let Some(reply) = reply {
                if count >= answer_from {
                    let _ = socket.send_to(reply, from).await;
                }
            }
        }
    });

    (addr, rx)
}

/// Poll `condition` until it holds, for at most five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
