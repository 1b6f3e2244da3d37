//! Answers other peers' certificate requests, so they can register with us.

use std::time::Duration;
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use shared::protocol::CERT_REQUEST;
use crate::registration::v1::RECEIVE_BUFFER_SIZE;
use crate::registration::v2::{certificate_codec, MAX_CERTIFICATE_LEN};

/// How long a stream client gets to send its request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve version 1 requests: a `REQUEST` datagram is answered with the
/// certificate, anything else is ignored.
pub async fn run_datagram(
    socket: UdpSocket,
    certificate: Bytes,
    cancel: CancellationToken,
) -> Result<()> {
    if certificate.len() > RECEIVE_BUFFER_SIZE {
        tracing::warn!(
            "Certificate is {} bytes; version 1 peers read at most {}",
            certificate.len(),
            RECEIVE_BUFFER_SIZE
        );
    }

    tracing::info!(
        "Answering certificate requests on udp {}",
        socket.local_addr().context("Failed to read local address")?
    );

    let mut buf = [0u8; 64];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, from) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::debug!("Failed to receive datagram: {}", e);
                        continue;
                    }
                };

                if &buf[..len] != CERT_REQUEST {
                    tracing::debug!("Ignoring unexpected datagram from {}", from);
                    continue;
                }

                tracing::debug!("Sending certificate to {}", from);
                if let Err(e) = socket.send_to(&certificate, from).await {
                    tracing::warn!("Failed to send certificate to {}: {}", from, e);
                }
            }

            _ = cancel.cancelled() => {
                tracing::info!("Datagram responder shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Serve version 2 requests: one `REQUEST` frame per connection, answered
/// with one certificate frame.
pub async fn run_stream(
    listener: TcpListener,
    certificate: Bytes,
    cancel: CancellationToken,
) -> Result<()> {
    if certificate.len() > MAX_CERTIFICATE_LEN {
        anyhow::bail!(
            "Certificate is {} bytes, larger than the {} byte frame limit",
            certificate.len(),
            MAX_CERTIFICATE_LEN
        );
    }

    tracing::info!(
        "Answering certificate requests on tcp {}",
        listener.local_addr().context("Failed to read local address")?
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, from)) => {
                        let certificate = certificate.clone();
                        tokio::spawn(async move {
                            if let Err(e) = answer(stream, certificate).await {
                                tracing::debug!("Certificate exchange with {} failed: {:#}", from, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                    }
                }
            }

            _ = cancel.cancelled() => {
                tracing::info!("Stream responder shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn answer(stream: TcpStream, certificate: Bytes) -> Result<()> {
    let mut framed = Framed::new(stream, certificate_codec());

    let request = tokio::time::timeout(REQUEST_TIMEOUT, framed.next())
        .await
        .context("Timed out waiting for request")?
        .context("Connection closed before request")?
        .context("Failed to read request frame")?;

    if &request[..] != CERT_REQUEST {
        anyhow::bail!("Unexpected request frame of {} bytes", request.len());
    }

    framed
        .send(certificate)
        .await
        .context("Failed to send certificate frame")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::{v1::DatagramHandshake, v2::StreamHandshake, Exchange, Handshake};

    #[tokio::test]
    async fn test_datagram_responder() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let responder = tokio::spawn(run_datagram(
            socket,
            Bytes::from_static(b"cert-v1"),
            cancel.clone(),
        ));

        let exchange = DatagramHandshake.exchange(addr, Duration::from_secs(2)).await;
        assert_eq!(exchange, Exchange::Reply(b"cert-v1".to_vec()));

        cancel.cancel();
        responder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_datagram_responder_ignores_other_requests() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(run_datagram(socket, Bytes::from_static(b"cert-v1"), cancel.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"HELLO", addr).await.unwrap();

        let mut buf = [0u8; 64];
        let reply = tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(reply.is_err());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stream_responder() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let responder = tokio::spawn(run_stream(
            listener,
            Bytes::from_static(b"cert-v2"),
            cancel.clone(),
        ));

        let exchange = StreamHandshake.exchange(addr, Duration::from_secs(2)).await;
        assert_eq!(exchange, Exchange::Reply(b"cert-v2".to_vec()));

        cancel.cancel();
        responder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_certificate_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let certificate = Bytes::from(vec![0u8; MAX_CERTIFICATE_LEN + 1]);

        let result = run_stream(listener, certificate, CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
