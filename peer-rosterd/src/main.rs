mod api;
mod config;
mod mdns;
mod peer;
mod registration;
mod responder;
mod trust;
mod trust_store;
mod validator;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::peer::manager::PeerManager;
use crate::peer::observer::LogObserver;
use crate::trust::db::TrustDb;
use crate::trust_store::TrustHandle;
use crate::validator::TrustStoreValidator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("peer_rosterd=info"))
        )
        .init();

    tracing::info!("Starting peer-rosterd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/peer-roster/rosterd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let db = TrustDb::open(&config.trust.db_path)?;
    tracing::info!("Opened trust store at {:?}", config.trust.db_path);
    let trust = TrustHandle::spawn(db);

    let manager = Arc::new(PeerManager::new(
        config.registration.settings(),
        Arc::new(TrustStoreValidator::new(trust.clone())),
        Arc::new(LogObserver),
    ));
    manager.set_service_type(&config.discovery.service_type);

    let mdns_daemon = ServiceDaemon::new()
        .context("Failed to create mDNS daemon")?;
    if let Some(interface) = &config.discovery.interface {
        mdns_daemon
            .disable_interface(mdns_sd::IfKind::All)
            .context("Failed to disable default interfaces")?;
        mdns_daemon
            .enable_interface(interface.as_str())
            .with_context(|| format!("Failed to enable interface {}", interface))?;
    }

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    // Answer certificate requests before announcing ourselves
    match config.identity.load_certificate()? {
        Some(certificate) => {
            let certificate = Bytes::from(certificate);

            let socket = tokio::net::UdpSocket::bind(("::", config.identity.port))
                .await
                .with_context(|| format!("Failed to bind udp port {}", config.identity.port))?;
            let listener = tokio::net::TcpListener::bind(("::", config.identity.auth_port))
                .await
                .with_context(|| format!("Failed to bind tcp port {}", config.identity.auth_port))?;

            let datagram_cancel = cancel.clone();
            let datagram_certificate = certificate.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = responder::run_datagram(socket, datagram_certificate, datagram_cancel).await {
                    tracing::error!("Datagram responder error: {}", e);
                }
            }));

            let stream_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = responder::run_stream(listener, certificate, stream_cancel).await {
                    tracing::error!("Stream responder error: {}", e);
                }
            }));
        }
        None => {
            tracing::warn!("No certificate configured, peers cannot register with us");
        }
    }

    let service_info = if config.identity.advertise {
        Some(mdns::advertise::register_peer(
            &mdns_daemon,
            &config.discovery.service_type,
            &config.identity,
        )?)
    } else {
        None
    };

    let (browser_tx, browser_rx) = mpsc::channel(256);
    let browser_cancel = cancel.clone();
    let browser_daemon = mdns_daemon.clone();
    let service_type = config.discovery.service_type.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = mdns::browser::run_browser(browser_daemon, service_type, browser_tx, browser_cancel).await {
            tracing::error!("mDNS browser error: {}", e);
        }
    }));

    let intake_cancel = cancel.clone();
    let intake_manager = manager.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = peer::manager::run_intake(intake_manager, browser_rx, intake_cancel).await {
            tracing::error!("Peer intake error: {}", e);
        }
    }));

    let app = api::routes::router(api::routes::AppState {
        manager: manager.clone(),
        trust: trust.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    }));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();
    futures::future::join_all(tasks).await;

    // Signal every registration worker, then wait for all of them
    manager.shutdown().await;

    if let Some(service_info) = &service_info {
        if let Err(e) = mdns::advertise::unregister_peer(&mdns_daemon, service_info) {
            tracing::error!("Failed to unregister mDNS service: {}", e);
        }
    }

    if let Err(e) = trust.shutdown().await {
        tracing::error!("Failed to shutdown trust store: {}", e);
    }

    if let Err(e) = mdns_daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
