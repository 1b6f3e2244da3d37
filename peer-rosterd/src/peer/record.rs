use std::sync::Mutex;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use shared::protocol::{
    FALLBACK_OS, MAX_API_VERSION, MIN_API_VERSION, PEER_TYPE_REAL, TXT_API_VERSION,
    TXT_AUTH_PORT, TXT_HOSTNAME, TXT_OS, TXT_TYPE,
};
use shared::types::{PeerAddresses, PeerDescriptor, PeerStatus, PeerSummary};
use super::lock;

/// Registration protocol a peer speaks, clamped to what we support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    /// Datagram certificate request on the primary port
    V1,
    /// Length-delimited stream exchange on the auth port
    V2,
}

impl ApiVersion {
    /// Interpret an announced `api-version` value.
    /// Absent or non-numeric text is version 1; numbers are clamped into range.
    pub fn from_announced(value: Option<&str>) -> Self {
        let announced = value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(i64::from(MIN_API_VERSION))
            .clamp(i64::from(MIN_API_VERSION), i64::from(MAX_API_VERSION));

        match announced {
            1 => ApiVersion::V1,
            _ => ApiVersion::V2,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ApiVersion::V1 => 1,
            ApiVersion::V2 => 2,
        }
    }
}

/// Normalize a service type so suffix matching lands on a label boundary:
/// `_ws._tcp.local` becomes `._ws._tcp.local.`
pub fn normalize_service_type(service_type: &str) -> String {
    if service_type.is_empty() {
        return String::new();
    }

    let mut normalized = String::with_capacity(service_type.len() + 2);
    if !service_type.starts_with('.') {
        normalized.push('.');
    }
    normalized.push_str(service_type);
    if !normalized.ends_with('.') {
        normalized.push('.');
    }
    normalized
}

/// Strip `suffix` from `ident` when it is an exact trailing match.
/// An ident no longer than the suffix is returned untouched.
pub fn strip_service_suffix<'a>(ident: &'a str, suffix: &str) -> &'a str {
    if suffix.is_empty() || ident.len() <= suffix.len() {
        return ident;
    }

    ident.strip_suffix(suffix).unwrap_or(ident)
}

/// Mutable part of a record, only touched under the record's own lock
#[derive(Debug, Clone, Copy)]
struct PeerState {
    visible: bool,
    status: PeerStatus,
}

/// One discovered peer and its registration lifecycle.
///
/// Identity fields are fixed at construction. `visible` and `status` are
/// written by the record's registration worker; the manager only ever
/// cancels the record.
#[derive(Debug)]
pub struct PeerRecord {
    id: String,
    hostname: String,
    addresses: PeerAddresses,
    port: u16,
    auth_port: u16,
    api_version: ApiVersion,
    os: String,
    discovered_at: DateTime<Utc>,
    state: Mutex<PeerState>,
    cancel: CancellationToken,
}

impl PeerRecord {
    /// Build a record from a discovery announcement.
    ///
    /// Returns `None` for announcements that are not real peers: missing
    /// `type` or `hostname`, a `type` other than `real`, or no usable port.
    pub fn from_descriptor(descriptor: &PeerDescriptor, service_type: &str) -> Option<Self> {
        let txt = &descriptor.txt;

        if txt.get(TXT_TYPE).map(String::as_str) != Some(PEER_TYPE_REAL) {
            return None;
        }
        let hostname = txt.get(TXT_HOSTNAME)?;

        let port = descriptor.port;
        let auth_port = txt
            .get(TXT_AUTH_PORT)
            .and_then(|v| v.trim().parse::<u16>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(port);
        if auth_port == 0 {
            return None;
        }

        let os = txt
            .get(TXT_OS)
            .cloned()
            .unwrap_or_else(|| FALLBACK_OS.to_string());

        Some(Self {
            id: strip_service_suffix(&descriptor.name, service_type).to_string(),
            hostname: hostname.clone(),
            addresses: PeerAddresses::new(descriptor.ipv4, descriptor.ipv6),
            port,
            auth_port,
            api_version: ApiVersion::from_announced(txt.get(TXT_API_VERSION).map(String::as_str)),
            os,
            discovered_at: Utc::now(),
            state: Mutex::new(PeerState {
                visible: false,
                status: PeerStatus::Registering,
            }),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn addresses(&self) -> &PeerAddresses {
        &self.addresses
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth_port(&self) -> u16 {
        self.auth_port
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    pub fn is_visible(&self) -> bool {
        lock(&self.state).visible
    }

    /// Move to `status`. Returns true if the status actually changed.
    pub fn transition(&self, status: PeerStatus, visible: bool) -> bool {
        let mut state = lock(&self.state);
        let changed = state.status != status;
        state.status = status;
        state.visible = visible;
        changed
    }

    /// Ask the record's worker to stop. Wakes it from any wait immediately.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn summary(&self) -> PeerSummary {
        let state = *lock(&self.state);

        PeerSummary {
            id: self.id.clone(),
            hostname: self.hostname.clone(),
            addresses: self.addresses,
            port: self.port,
            auth_port: self.auth_port,
            api_version: self.api_version.as_u8(),
            os: self.os.clone(),
            visible: state.visible,
            status: state.status,
            discovered_at: self.discovered_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::descriptor;

    const SERVICE: &str = "._ws._tcp.local.";

    fn real(extra: &[(&str, &str)]) -> PeerDescriptor {
        let mut txt = vec![("type", "real"), ("hostname", "alice-laptop")];
        txt.extend_from_slice(extra);
        descriptor("alice._ws._tcp.local.", 42000, &txt)
    }

    #[test]
    fn test_strip_service_suffix() {
        assert_eq!(strip_service_suffix("alice._ws._tcp.local.", SERVICE), "alice");
        assert_eq!(strip_service_suffix("alice._ws._tcp.local", SERVICE), "alice._ws._tcp.local");
        assert_eq!(strip_service_suffix("alice._other._tcp.local.", SERVICE), "alice._other._tcp.local.");
        // Too short to carry the suffix plus a name
        assert_eq!(strip_service_suffix(SERVICE, SERVICE), SERVICE);
        assert_eq!(strip_service_suffix("alice", ""), "alice");
    }

    #[test]
    fn test_normalize_service_type() {
        assert_eq!(normalize_service_type("_ws._tcp.local"), "._ws._tcp.local.");
        assert_eq!(normalize_service_type("_ws._tcp.local."), "._ws._tcp.local.");
        assert_eq!(normalize_service_type("._ws._tcp.local."), "._ws._tcp.local.");
        assert_eq!(normalize_service_type(""), "");
    }

    #[test]
    fn test_api_version_clamping() {
        assert_eq!(ApiVersion::from_announced(Some("0")), ApiVersion::V1);
        assert_eq!(ApiVersion::from_announced(Some("5")), ApiVersion::V2);
        assert_eq!(ApiVersion::from_announced(Some("2")), ApiVersion::V2);
        assert_eq!(ApiVersion::from_announced(Some("-4")), ApiVersion::V1);
        assert_eq!(ApiVersion::from_announced(Some("two")), ApiVersion::V1);
        assert_eq!(ApiVersion::from_announced(None), ApiVersion::V1);
    }

    #[test]
    fn test_accepts_real_peer_with_defaults() {
        let record = PeerRecord::from_descriptor(&real(&[]), SERVICE).unwrap();

        assert_eq!(record.id(), "alice");
        assert_eq!(record.hostname(), "alice-laptop");
        assert_eq!(record.api_version(), ApiVersion::V1);
        assert_eq!(record.auth_port(), record.port());
        assert_eq!(record.summary().os, FALLBACK_OS);
        assert!(record.addresses().valid);
        assert!(!record.is_visible());
        assert_eq!(record.summary().status, PeerStatus::Registering);
        assert!(!record.cancellation().is_cancelled());
    }

    #[test]
    fn test_announced_fields() {
        let record = PeerRecord::from_descriptor(
            &real(&[("api-version", "2"), ("auth-port", "42001"), ("os", "Windows")]),
            SERVICE,
        )
        .unwrap();

        assert_eq!(record.api_version(), ApiVersion::V2);
        assert_eq!(record.auth_port(), 42001);
        assert_eq!(record.summary().os, "Windows");
    }

    #[test]
    fn test_bad_auth_port_falls_back_to_port() {
        let record = PeerRecord::from_descriptor(&real(&[("auth-port", "nope")]), SERVICE).unwrap();
        assert_eq!(record.auth_port(), 42000);

        let record = PeerRecord::from_descriptor(&real(&[("auth-port", "0")]), SERVICE).unwrap();
        assert_eq!(record.auth_port(), 42000);
    }

    #[test]
    fn test_rejects_noise() {
        let missing_type = descriptor("a._ws._tcp.local.", 42000, &[("hostname", "a")]);
        let missing_hostname = descriptor("a._ws._tcp.local.", 42000, &[("type", "real")]);
        let wrong_type = descriptor("a._ws._tcp.local.", 42000, &[("type", "flat"), ("hostname", "a")]);

        assert!(PeerRecord::from_descriptor(&missing_type, SERVICE).is_none());
        assert!(PeerRecord::from_descriptor(&missing_hostname, SERVICE).is_none());
        assert!(PeerRecord::from_descriptor(&wrong_type, SERVICE).is_none());

        let mut no_port = real(&[]);
        no_port.port = 0;
        assert!(PeerRecord::from_descriptor(&no_port, SERVICE).is_none());
    }

    #[test]
    fn test_transition_reports_changes() {
        let record = PeerRecord::from_descriptor(&real(&[]), SERVICE).unwrap();

        assert!(record.transition(PeerStatus::Online, true));
        assert!(!record.transition(PeerStatus::Online, true));

        let summary = record.summary();
        assert_eq!(summary.status, PeerStatus::Online);
        assert!(summary.visible);
        assert_eq!(summary.api_version, 1);
    }

    #[test]
    fn test_signal_stop() {
        let record = PeerRecord::from_descriptor(&real(&[]), SERVICE).unwrap();
        record.signal_stop();
        assert!(record.cancellation().is_cancelled());
    }
}
