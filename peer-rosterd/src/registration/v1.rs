use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use shared::protocol::CERT_REQUEST;
use crate::peer::record::PeerRecord;
use super::{Exchange, ExchangeFuture, Handshake};

/// Receive buffer for certificate replies; a PEM certificate fits comfortably
pub const RECEIVE_BUFFER_SIZE: usize = 8192;

/// Version 1: one `REQUEST` datagram to the peer's primary port, the reply
/// datagram is the certificate.
pub struct DatagramHandshake;

impl Handshake for DatagramHandshake {
    fn port(&self, record: &PeerRecord) -> u16 {
        record.port()
    }

    fn exchange<'a>(&'a self, target: SocketAddr, timeout: Duration) -> ExchangeFuture<'a> {
        Box::pin(async move {
            match request_certificate(target, timeout).await {
                Ok(exchange) => exchange,
                Err(e) => {
                    tracing::debug!("Certificate request to {} failed: {:#}", target, e);
                    Exchange::NoReply
                }
            }
        })
    }
}

async fn request_certificate(target: SocketAddr, timeout: Duration) -> Result<Exchange> {
    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local)
        .await
        .context("Failed to bind datagram socket")?;

    socket
        .send_to(CERT_REQUEST, target)
        .await
        .with_context(|| format!("Failed to send request to {}", target))?;

    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];

    // Datagrams from anyone but the peer are dropped without ending the attempt
    loop {
        let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(Exchange::NoReply),
            Ok(received) => received.context("Failed to receive reply")?,
        };

        if from != target {
            tracing::debug!("Ignoring datagram from unexpected address {}", from);
            continue;
        }

        if len == 0 {
            return Ok(Exchange::NoReply);
        }

        return Ok(Exchange::Reply(buf[..len].to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_is_returned_verbatim() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = peer.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = peer.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], CERT_REQUEST);
            peer.send_to(b"-----BEGIN CERTIFICATE-----", from).await.unwrap();
        });

        let exchange = DatagramHandshake
            .exchange(target, Duration::from_secs(2))
            .await;
        assert_eq!(exchange, Exchange::Reply(b"-----BEGIN CERTIFICATE-----".to_vec()));
    }

    #[tokio::test]
    async fn test_silence_is_no_reply() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = peer.local_addr().unwrap();

        let started = Instant::now();
        let exchange = DatagramHandshake
            .exchange(target, Duration::from_millis(50))
            .await;

        assert_eq!(exchange, Exchange::NoReply);
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(peer);
    }
}
