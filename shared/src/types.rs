use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// A peer announcement as resolved by the discovery source.
/// Nothing here has been validated yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerDescriptor {
    /// Full DNS-SD instance name, e.g. "alice._warpinator._tcp.local."
    pub name: String,

    pub ipv4: Option<Ipv4Addr>,

    pub ipv6: Option<Ipv6Addr>,

    /// Announced service port
    pub port: u16,

    /// TXT record key-value pairs
    pub txt: HashMap<String, String>,
}

/// Network addresses a peer was announced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddresses {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// True when at least one address is known
    pub valid: bool,
}

impl PeerAddresses {
    pub fn new(ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) -> Self {
        Self {
            ipv4,
            ipv6,
            valid: ipv4.is_some() || ipv6.is_some(),
        }
    }

    /// Address used for handshakes: IPv4 when announced, otherwise IPv6.
    pub fn primary(&self) -> Option<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .or_else(|| self.ipv6.map(IpAddr::V6))
    }
}

/// Registration lifecycle of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Registering,
    Online,
    Offline,
    Unreachable,
}

/// Point-in-time copy of a roster entry, handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    /// Announcement name with the service type stripped
    pub id: String,

    pub hostname: String,

    pub addresses: PeerAddresses,

    pub port: u16,

    /// Port used for version 2 registration
    pub auth_port: u16,

    pub api_version: u8,

    pub os: String,

    /// Whether the peer should be shown to the user
    pub visible: bool,

    pub status: PeerStatus,

    /// When the announcement was accepted into the roster
    pub discovered_at: DateTime<Utc>,
}

/// A certificate pinned in the trust store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedCertificate {
    pub hostname: String,

    /// SHA-256 of the certificate payload, hex encoded
    pub fingerprint: String,

    /// Addresses the peer was last registered from
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
