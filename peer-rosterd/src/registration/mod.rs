//! Per-peer registration workers.
//!
//! A worker owns one [`PeerRecord`] for its whole life. It asks the peer for
//! its certificate using the handshake matching the peer's api version,
//! hands the reply to the [`CertificateValidator`] and records the outcome
//! as a status transition. Attempts that get no reply are retried in cycles
//! separated by a backoff; every wait wakes up as soon as the record is
//! told to stop.

pub mod v1;
pub mod v2;

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use shared::types::PeerStatus;
use crate::config::RegistrationSettings;
use crate::peer::observer::RosterObserver;
use crate::peer::record::{ApiVersion, PeerRecord};
use crate::validator::CertificateValidator;

/// Result of a single request/response attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// Certificate payload received from the peer
    Reply(Vec<u8>),
    /// Timed out, or the transport failed; counts as a failed attempt
    NoReply,
}

pub type ExchangeFuture<'a> = Pin<Box<dyn Future<Output = Exchange> + Send + 'a>>;

/// One registration protocol version
pub trait Handshake: Send + Sync {
    /// Port of `record` this handshake talks to
    fn port(&self, record: &PeerRecord) -> u16;

    /// Ask `target` for its certificate once, giving up after `timeout`
    fn exchange<'a>(&'a self, target: SocketAddr, timeout: Duration) -> ExchangeFuture<'a>;
}

/// Handshake implementation for an api version
pub fn handshake_for(version: ApiVersion) -> Box<dyn Handshake> {
    match version {
        ApiVersion::V1 => Box::new(v1::DatagramHandshake),
        ApiVersion::V2 => Box::new(v2::StreamHandshake),
    }
}

/// How a worker finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The validator accepted the peer's certificate
    Registered,
    /// The validator refused the peer's certificate
    Refused,
    /// No usable address, or the cycle limit ran out
    Unreachable,
    /// Stopped before registering
    Cancelled,
}

impl Outcome {
    /// Status and visibility the record ends up with
    pub fn status(self) -> (PeerStatus, bool) {
        match self {
            Outcome::Registered => (PeerStatus::Online, true),
            Outcome::Refused | Outcome::Unreachable => (PeerStatus::Unreachable, false),
            Outcome::Cancelled => (PeerStatus::Offline, false),
        }
    }
}

pub struct Worker {
    record: Arc<PeerRecord>,
    validator: Arc<dyn CertificateValidator>,
    observer: Arc<dyn RosterObserver>,
    settings: RegistrationSettings,
}

impl Worker {
    pub fn new(
        record: Arc<PeerRecord>,
        validator: Arc<dyn CertificateValidator>,
        observer: Arc<dyn RosterObserver>,
        settings: RegistrationSettings,
    ) -> Self {
        Self {
            record,
            validator,
            observer,
            settings,
        }
    }

    /// Register the peer, then publish the resulting status.
    ///
    /// Nothing happens until `start` fires (or its sender is dropped), so the
    /// roster can announce the peer before any of its status changes. The
    /// gate ignores cancellation: a stopped record still waits for its
    /// announcement, then exits without sending anything.
    pub async fn run(self, start: oneshot::Receiver<()>) -> Outcome {
        let _ = start.await;

        let handshake = handshake_for(self.record.api_version());
        let outcome = self.register(handshake.as_ref()).await;

        match outcome {
            Outcome::Registered => {
                tracing::info!("Registered with {}", self.record.hostname());
            }
            Outcome::Refused | Outcome::Unreachable => {
                tracing::debug!(
                    "Unable to register with {} ({}:{}) - api version {}",
                    self.record.hostname(),
                    display_address(&self.record),
                    handshake.port(&self.record),
                    self.record.api_version().as_u8()
                );
            }
            Outcome::Cancelled => {
                tracing::debug!("Registration with {} cancelled", self.record.hostname());
            }
        }

        let (status, visible) = outcome.status();
        if self.record.transition(status, visible) {
            self.observer.on_peer_status_changed(self.record.id(), status);
        }

        outcome
    }

    async fn register(&self, handshake: &dyn Handshake) -> Outcome {
        let record = &self.record;
        let cancel = record.cancellation();

        let Some(ip) = record.addresses().primary() else {
            tracing::warn!("No address announced for {}", record.hostname());
            return Outcome::Unreachable;
        };
        let target = SocketAddr::new(ip, handshake.port(record));

        tracing::debug!(
            "Registering with {} ({}) - api version {}",
            record.hostname(),
            target,
            record.api_version().as_u8()
        );

        let mut cycles = 0u32;
        loop {
            tracing::debug!("Requesting cert from {}...", record.hostname());

            for _ in 0..self.settings.attempts {
                if cancel.is_cancelled() {
                    return Outcome::Cancelled;
                }

                let exchange = tokio::select! {
                    _ = cancel.cancelled() => return Outcome::Cancelled,
                    exchange = handshake.exchange(target, self.settings.receive_timeout) => exchange,
                };

                if let Exchange::Reply(payload) = exchange {
                    tracing::debug!("Got remote cert from {}", record.hostname());

                    let accepted = self
                        .validator
                        .validate(record.hostname(), record.addresses(), &payload)
                        .await;

                    return if accepted {
                        Outcome::Registered
                    } else {
                        Outcome::Refused
                    };
                }
            }

            cycles += 1;
            if self.settings.max_cycles.is_some_and(|max| cycles >= max) {
                tracing::warn!(
                    "Giving up on {} after {} failed cycles",
                    record.hostname(),
                    cycles
                );
                return Outcome::Unreachable;
            }

            tracing::debug!(
                "Can't get cert from {}. Retry limit ({}) exceeded. Waiting {}s.",
                record.hostname(),
                self.settings.attempts,
                self.settings.backoff.as_secs()
            );

            tokio::select! {
                _ = cancel.cancelled() => return Outcome::Cancelled,
                _ = tokio::time::sleep(self.settings.backoff) => {}
            }
        }
    }
}

fn display_address(record: &PeerRecord) -> String {
    record
        .addresses()
        .primary()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "no address".to_string())
}
