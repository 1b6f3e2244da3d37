use std::net::SocketAddr;
use std::time::Duration;
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use shared::protocol::CERT_REQUEST;
use crate::peer::record::PeerRecord;
use super::{Exchange, ExchangeFuture, Handshake};

/// Largest certificate frame either side accepts
pub const MAX_CERTIFICATE_LEN: usize = 64 * 1024;

/// Frames are a 4-byte big-endian length followed by the body
pub fn certificate_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_CERTIFICATE_LEN)
        .new_codec()
}

/// Version 2: a `REQUEST` frame over a stream connection to the peer's auth
/// port, answered by one certificate frame.
pub struct StreamHandshake;

impl Handshake for StreamHandshake {
    fn port(&self, record: &PeerRecord) -> u16 {
        record.auth_port()
    }

    fn exchange<'a>(&'a self, target: SocketAddr, timeout: Duration) -> ExchangeFuture<'a> {
        Box::pin(async move {
            match request_certificate(target, Instant::now() + timeout).await {
                Ok(exchange) => exchange,
                Err(e) => {
                    tracing::debug!("Certificate request to {} failed: {:#}", target, e);
                    Exchange::NoReply
                }
            }
        })
    }
}

async fn request_certificate(target: SocketAddr, deadline: Instant) -> Result<Exchange> {
    let stream = match timeout_at(deadline, TcpStream::connect(target)).await {
        Err(_) => return Ok(Exchange::NoReply),
        Ok(stream) => stream.with_context(|| format!("Failed to connect to {}", target))?,
    };

    let mut framed = Framed::new(stream, certificate_codec());

    match timeout_at(deadline, framed.send(Bytes::from_static(CERT_REQUEST))).await {
        Err(_) => return Ok(Exchange::NoReply),
        Ok(sent) => sent.context("Failed to send request frame")?,
    }

    match timeout_at(deadline, framed.next()).await {
        Err(_) | Ok(None) => Ok(Exchange::NoReply),
        Ok(Some(frame)) => {
            let frame = frame.context("Failed to read certificate frame")?;
            if frame.is_empty() {
                return Ok(Exchange::NoReply);
            }
            Ok(Exchange::Reply(frame.to_vec()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_certificate_frame_is_returned() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, certificate_codec());
            let request = framed.next().await.unwrap().unwrap();
            assert_eq!(&request[..], CERT_REQUEST);
            framed.send(Bytes::from_static(b"cert-v2")).await.unwrap();
        });

        let exchange = StreamHandshake
            .exchange(target, Duration::from_secs(2))
            .await;
        assert_eq!(exchange, Exchange::Reply(b"cert-v2".to_vec()));
    }

    #[tokio::test]
    async fn test_refused_connection_is_no_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap();
        drop(listener);

        let exchange = StreamHandshake
            .exchange(target, Duration::from_millis(500))
            .await;
        assert_eq!(exchange, Exchange::NoReply);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap();

        let started = Instant::now();
        let exchange = StreamHandshake
            .exchange(target, Duration::from_millis(100))
            .await;

        assert_eq!(exchange, Exchange::NoReply);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(listener);
    }
}
