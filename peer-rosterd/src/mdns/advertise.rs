use std::collections::HashMap;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use anyhow::{Context, Result};
use shared::protocol::{
    PEER_TYPE_REAL, TXT_API_VERSION, TXT_AUTH_PORT, TXT_HOSTNAME, TXT_OS, TXT_TYPE,
};
use crate::config::IdentityConfig;

/// Announce this host as a real peer under `service_type`
pub fn register_peer(
    daemon: &ServiceDaemon,
    service_type: &str,
    identity: &IdentityConfig,
) -> Result<ServiceInfo> {
    let hostname = identity.resolve_hostname()?;
    let ip = local_ip_address::local_ip().context("Failed to determine local address")?;

    let service_info = ServiceInfo::new(
        service_type,
        &hostname,
        &format!("{}.local.", hostname),
        &ip.to_string(),
        identity.port,
        announcement_txt(&hostname, identity),
    )
    .context("Failed to create ServiceInfo")?;

    daemon
        .register(service_info.clone())
        .context("Failed to register mDNS service")?;

    tracing::info!(
        "Registered {} as {} on {}:{}",
        service_type,
        hostname,
        ip,
        identity.port
    );

    Ok(service_info)
}

pub fn unregister_peer(daemon: &ServiceDaemon, service_info: &ServiceInfo) -> Result<()> {
    daemon
        .unregister(service_info.get_fullname())
        .context("Failed to unregister mDNS service")?;

    tracing::info!("Unregistered {}", service_info.get_fullname());
    Ok(())
}

/// TXT records other peers need to register with us
fn announcement_txt(hostname: &str, identity: &IdentityConfig) -> HashMap<String, String> {
    HashMap::from([
        (TXT_TYPE.to_string(), PEER_TYPE_REAL.to_string()),
        (TXT_HOSTNAME.to_string(), hostname.to_string()),
        (TXT_API_VERSION.to_string(), identity.api_version.to_string()),
        (TXT_AUTH_PORT.to_string(), identity.auth_port.to_string()),
        (TXT_OS.to_string(), identity.os.clone()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::record::PeerRecord;
    use shared::types::PeerDescriptor;

    #[test]
    fn test_announcement_is_accepted_by_peers() {
        let identity = IdentityConfig {
            auth_port: 43001,
            os: "Windows".to_string(),
            ..IdentityConfig::default()
        };

        let descriptor = PeerDescriptor {
            name: "desk._warpinator._tcp.local.".to_string(),
            ipv4: Some(std::net::Ipv4Addr::LOCALHOST),
            ipv6: None,
            port: identity.port,
            txt: announcement_txt("desk", &identity),
        };

        let record = PeerRecord::from_descriptor(&descriptor, "._warpinator._tcp.local.").unwrap();
        assert_eq!(record.id(), "desk");
        assert_eq!(record.hostname(), "desk");
        assert_eq!(record.auth_port(), 43001);
        assert_eq!(record.api_version().as_u8(), identity.api_version);
        assert_eq!(record.summary().os, "Windows");
    }
}
