use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use anyhow::Result;
use shared::types::{PeerDescriptor, PeerSummary};
use crate::config::RegistrationSettings;
use crate::mdns::browser::BrowserEvent;
use crate::registration::Worker;
use crate::validator::CertificateValidator;
use super::lock;
use super::observer::RosterObserver;
use super::record::{normalize_service_type, strip_service_suffix, PeerRecord};

/// Membership of the roster. Record fields live behind each record's own lock.
struct Roster {
    /// Discovery order
    peers: Vec<Arc<PeerRecord>>,
    /// Normalized suffix stripped from announcement names
    service_type: String,
    /// Set once shutdown starts; no peers are accepted afterwards
    closed: bool,
}

/// Owns the roster of discovered peers and one registration worker per peer.
///
/// Two lock levels: the roster lock guards membership and the service type,
/// each record's lock guards its status. Nothing blocks or awaits while
/// holding either, and workers never take the roster lock.
pub struct PeerManager {
    roster: Mutex<Roster>,
    workers: TaskTracker,
    validator: Arc<dyn CertificateValidator>,
    observer: Arc<dyn RosterObserver>,
    settings: RegistrationSettings,
}

impl PeerManager {
    pub fn new(
        settings: RegistrationSettings,
        validator: Arc<dyn CertificateValidator>,
        observer: Arc<dyn RosterObserver>,
    ) -> Self {
        Self {
            roster: Mutex::new(Roster {
                peers: Vec::new(),
                service_type: String::new(),
                closed: false,
            }),
            workers: TaskTracker::new(),
            validator,
            observer,
            settings,
        }
    }

    /// Set the service type stripped from announcement names
    pub fn set_service_type(&self, service_type: &str) {
        lock(&self.roster).service_type = normalize_service_type(service_type);
    }

    pub fn get_service_type(&self) -> String {
        lock(&self.roster).service_type.clone()
    }

    /// Roster id for an announcement name
    pub fn peer_id(&self, name: &str) -> String {
        let roster = lock(&self.roster);
        strip_service_suffix(name, &roster.service_type).to_string()
    }

    /// Accept a discovery announcement and start registering with the peer.
    ///
    /// Announcements that are not real peers are dropped without error.
    /// Re-announcements are not merged: each accepted announcement gets its
    /// own entry and worker. Must be called from within a Tokio runtime.
    pub fn add_peer(&self, descriptor: &PeerDescriptor) -> bool {
        let (summary, start) = {
            let mut roster = lock(&self.roster);

            if roster.closed {
                tracing::debug!("Shutting down, ignoring announcement {}", descriptor.name);
                return false;
            }

            let Some(record) = PeerRecord::from_descriptor(descriptor, &roster.service_type) else {
                tracing::debug!("Ignoring announcement {}", descriptor.name);
                return false;
            };
            let record = Arc::new(record);

            let (start, gate) = oneshot::channel();
            let worker = Worker::new(
                record.clone(),
                self.validator.clone(),
                self.observer.clone(),
                self.settings,
            );
            self.workers.spawn(worker.run(gate));

            let summary = record.summary();
            roster.peers.push(record);
            (summary, start)
        };

        self.observer.on_peer_added(&summary);
        let _ = start.send(());
        true
    }

    /// Withdrawal of a peer's announcement.
    ///
    /// Records stay in the roster with their workers until shutdown; whether a
    /// withdrawn peer should be evicted or merged with a later announcement is
    /// an open product decision.
    pub fn remove_peer(&self, id: &str) {
        let roster = lock(&self.roster);
        let known = roster.peers.iter().any(|p| p.id() == id);
        tracing::debug!("Peer {} withdrawn (known: {}), keeping its record", id, known);
    }

    pub fn get_total_count(&self) -> usize {
        lock(&self.roster).peers.len()
    }

    pub fn get_visible_count(&self) -> usize {
        lock(&self.roster)
            .peers
            .iter()
            .filter(|p| p.is_visible())
            .count()
    }

    /// Snapshot of every roster entry in discovery order
    pub fn list_current_peers(&self) -> Vec<PeerSummary> {
        lock(&self.roster)
            .peers
            .iter()
            .map(|p| p.summary())
            .collect()
    }

    /// Snapshot of the entries carrying `id`
    pub fn find_peers(&self, id: &str) -> Vec<PeerSummary> {
        lock(&self.roster)
            .peers
            .iter()
            .filter(|p| p.id() == id)
            .map(|p| p.summary())
            .collect()
    }

    /// Number of registration workers still running
    pub fn running_workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop every worker and release the roster.
    ///
    /// All workers are signalled before any is waited on, so shutdown takes
    /// at most one in-flight step of the slowest worker rather than the sum
    /// of their backoffs.
    pub async fn shutdown(&self) {
        let signalled = {
            let mut roster = lock(&self.roster);
            roster.closed = true;
            for record in &roster.peers {
                record.signal_stop();
            }
            self.workers.close();
            roster.peers.len()
        };

        tracing::info!("Waiting for {} registration workers", signalled);
        self.workers.wait().await;

        let released = std::mem::take(&mut lock(&self.roster).peers);
        for record in &released {
            self.observer.on_peer_removed(record.id());
        }

        tracing::info!("Peer manager stopped, released {} peers", released.len());
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        for record in &lock(&self.roster).peers {
            record.signal_stop();
        }
    }
}

/// Discovery intake loop - feeds browser events into the manager
pub async fn run_intake(
    manager: Arc<PeerManager>,
    mut rx: mpsc::Receiver<BrowserEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                match event {
                    BrowserEvent::Resolved(descriptor) => {
                        manager.add_peer(&descriptor);
                    }
                    BrowserEvent::Removed(name) => {
                        let id = manager.peer_id(&name);
                        manager.remove_peer(&id);
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Peer intake shutting down");
                break;
            }
        }
    }

    Ok(())
}
