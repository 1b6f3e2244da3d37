use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DEFAULT_SERVICE_TYPE, FALLBACK_OS, MAX_API_VERSION};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Restrict mDNS to a single interface; all interfaces when unset
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    /// Give up after this many failed cycles; retry forever when unset
    pub max_cycles: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Hostname announced to other peers; the system hostname when unset
    pub hostname: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_auth_port")]
    pub auth_port: u16,
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default = "default_api_version")]
    pub api_version: u8,
    /// Certificate handed out to peers that register with us.
    /// The responder stays off without one.
    pub certificate_path: Option<PathBuf>,
    #[serde(default = "default_advertise")]
    pub advertise: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrustConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Timing knobs for registration workers, resolved from [`RegistrationConfig`]
#[derive(Debug, Clone, Copy)]
pub struct RegistrationSettings {
    pub attempts: u32,
    pub receive_timeout: Duration,
    pub backoff: Duration,
    pub max_cycles: Option<u32>,
}

fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}

fn default_attempts() -> u32 {
    3
}

fn default_receive_timeout() -> u64 {
    1000
}

fn default_backoff() -> u64 {
    30
}

fn default_port() -> u16 {
    42000
}

fn default_auth_port() -> u16 {
    42001
}

fn default_os() -> String {
    FALLBACK_OS.to_string()
}

fn default_api_version() -> u8 {
    MAX_API_VERSION
}

fn default_advertise() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/peer-roster/trust.db")
}

fn default_listen() -> String {
    "[::]:8054".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            interface: None,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            receive_timeout_ms: default_receive_timeout(),
            backoff_secs: default_backoff(),
            max_cycles: None,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            port: default_port(),
            auth_port: default_auth_port(),
            os: default_os(),
            api_version: default_api_version(),
            certificate_path: None,
            advertise: default_advertise(),
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        RegistrationConfig::default().settings()
    }
}

impl RegistrationConfig {
    pub fn settings(&self) -> RegistrationSettings {
        RegistrationSettings {
            attempts: self.attempts.max(1),
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            backoff: Duration::from_secs(self.backoff_secs),
            max_cycles: self.max_cycles,
        }
    }
}

impl IdentityConfig {
    /// Configured hostname, falling back to the system hostname
    pub fn resolve_hostname(&self) -> Result<String> {
        if let Some(hostname) = &self.hostname {
            return Ok(hostname.clone());
        }

        let hostname = hostname::get()
            .context("Failed to get system hostname")?
            .to_string_lossy()
            .to_string();

        Ok(hostname)
    }

    /// Read the certificate handed out by the responder, if one is configured
    pub fn load_certificate(&self) -> Result<Option<Vec<u8>>> {
        let Some(path) = &self.certificate_path else {
            return Ok(None);
        };

        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read certificate: {}", path.display()))?;

        Ok(Some(bytes))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
