use shared::types::{PeerStatus, PeerSummary};

/// Receives roster changes so a presentation layer can update incrementally.
///
/// The manager and workers never hold a roster or record lock while calling
/// into an observer, so implementations may query the manager freely.
pub trait RosterObserver: Send + Sync {
    fn on_peer_added(&self, peer: &PeerSummary);

    fn on_peer_removed(&self, id: &str);

    fn on_peer_status_changed(&self, id: &str, status: PeerStatus);
}

/// Observer used by the daemon: roster changes go to the log
pub struct LogObserver;

impl RosterObserver for LogObserver {
    fn on_peer_added(&self, peer: &PeerSummary) {
        tracing::info!(
            "Peer {} ({}) added, api version {}",
            peer.id,
            peer.hostname,
            peer.api_version
        );
    }

    fn on_peer_removed(&self, id: &str) {
        tracing::info!("Peer {} removed", id);
    }

    fn on_peer_status_changed(&self, id: &str, status: PeerStatus) {
        tracing::info!("Peer {} is now {:?}", id, status);
    }
}
