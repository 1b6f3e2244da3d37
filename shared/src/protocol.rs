/// Default mDNS service type peers announce themselves under
pub const DEFAULT_SERVICE_TYPE: &str = "_warpinator._tcp.local.";

/// TXT record keys read from (and written to) peer announcements
pub const TXT_TYPE: &str = "type";
pub const TXT_HOSTNAME: &str = "hostname";
pub const TXT_API_VERSION: &str = "api-version";
pub const TXT_AUTH_PORT: &str = "auth-port";
pub const TXT_OS: &str = "os";

/// Value of the `type` TXT key carried by real file-sharing peers.
/// Announcements with any other value are discovery noise.
pub const PEER_TYPE_REAL: &str = "real";

/// Operating system reported for peers that do not announce one
pub const FALLBACK_OS: &str = "Linux";

/// Token sent to a peer to ask for its certificate
pub const CERT_REQUEST: &[u8] = b"REQUEST";

/// Supported registration protocol versions
pub const MIN_API_VERSION: u8 = 1;
pub const MAX_API_VERSION: u8 = 2;

/// API path prefix
pub const API_PREFIX: &str = "/v1";
