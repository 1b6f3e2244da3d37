use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use anyhow::{Context, Result};
use shared::types::PeerDescriptor;

/// Discovery events handed to the peer manager
pub enum BrowserEvent {
    Resolved(PeerDescriptor),
    /// Full instance name of a withdrawn announcement
    Removed(String),
}

pub async fn run_browser(
    daemon: ServiceDaemon,
    service_type: String,
    tx: mpsc::Sender<BrowserEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!("Browsing for {}", service_type);

    let receiver = daemon
        .browse(&service_type)
        .with_context(|| format!("Failed to browse {}", service_type))?;

    loop {
        tokio::select! {
            event = receiver.recv_async() => {
                match event {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let descriptor = convert_service_info(&info);
                        tracing::debug!("Resolved peer announcement: {}", descriptor.name);
                        if let Err(e) = tx.send(BrowserEvent::Resolved(descriptor)).await {
                            tracing::error!("Failed to send resolved event: {}", e);
                        }
                    }
                    Ok(ServiceEvent::ServiceRemoved(_typ, fullname)) => {
                        tracing::debug!("Peer announcement removed: {}", fullname);
                        if let Err(e) = tx.send(BrowserEvent::Removed(fullname)).await {
                            tracing::error!("Failed to send removed event: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("mDNS browse receiver disconnected: {}", e);
                        break;
                    }
                }
            }

            _ = cancel.cancelled() => {
                tracing::info!("mDNS browser shutting down");
                break;
            }
        }
    }

    if let Err(e) = daemon.stop_browse(&service_type) {
        tracing::debug!("Failed to stop browsing {}: {}", service_type, e);
    }

    Ok(())
}

/// Convert an mdns-sd ServiceInfo to a PeerDescriptor.
/// One address per family is kept: routable before link-local, then lowest.
fn convert_service_info(info: &ServiceInfo) -> PeerDescriptor {
    let addresses = info.get_addresses();

    let ipv4 = addresses
        .iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
        .min_by_key(|v4| (v4.is_link_local(), *v4));

    let ipv6 = addresses
        .iter()
        .filter_map(|addr| match addr {
            IpAddr::V6(v6) => Some(*v6),
            IpAddr::V4(_) => None,
        })
        .min_by_key(|v6| (is_link_local_v6(v6), *v6));

    let txt: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    PeerDescriptor {
        name: info.get_fullname().to_string(),
        ipv4,
        ipv6,
        port: info.get_port(),
        txt,
    }
}

/// fe80::/10
fn is_link_local_v6(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}
