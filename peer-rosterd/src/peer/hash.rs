use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{PeerAddresses, PeerStatus, PeerSummary};

/// Stable fields only: discovered_at differs between otherwise identical rosters
#[derive(Serialize)]
struct HashView<'a> {
    id: &'a str,
    hostname: &'a str,
    addresses: &'a PeerAddresses,
    port: u16,
    auth_port: u16,
    api_version: u8,
    os: &'a str,
    visible: bool,
    status: PeerStatus,
}

/// Computes a SHA-256 digest of a roster snapshot.
/// Roster order is discovery order and is part of the digest.
pub fn compute_hash(peers: &[PeerSummary]) -> String {
    let views: Vec<HashView<'_>> = peers
        .iter()
        .map(|p| HashView {
            id: &p.id,
            hostname: &p.hostname,
            addresses: &p.addresses,
            port: p.port,
            auth_port: p.auth_port,
            api_version: p.api_version,
            os: &p.os,
            visible: p.visible,
            status: p.status,
        })
        .collect();

    let mut hasher = Sha256::new();
    // Plain data with no maps: serialization cannot fail
    if let Ok(json) = serde_json::to_vec(&views) {
        hasher.update(&json);
    }
    hex::encode(hasher.finalize())
}
