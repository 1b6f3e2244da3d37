use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::Result;
use shared::types::{PeerAddresses, TrustedCertificate};
use crate::trust::db::{TrustDb, TrustDecision};

/// Commands sent to the trust thread
pub enum TrustCommand {
    Verify {
        hostname: String,
        addresses: PeerAddresses,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<TrustDecision>>,
    },
    GetAll(oneshot::Sender<Result<Vec<TrustedCertificate>>>),
    GetOne(String, oneshot::Sender<Result<Option<TrustedCertificate>>>),
    Forget(String, oneshot::Sender<Result<bool>>),
    Shutdown,
}

/// Handle to the thread owning the trust database
#[derive(Clone)]
pub struct TrustHandle {
    tx: mpsc::Sender<TrustCommand>,
}

impl TrustHandle {
    /// Spawn the trust thread with the given database
    pub fn spawn(db: TrustDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<TrustCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    TrustCommand::Verify { hostname, addresses, payload, reply } => {
                        let result = db.check_and_install(&hostname, &addresses, &payload);
                        let _ = reply.send(result);
                    }
                    TrustCommand::GetAll(reply) => {
                        let _ = reply.send(db.get_all_certificates());
                    }
                    TrustCommand::GetOne(hostname, reply) => {
                        let _ = reply.send(db.get_certificate(&hostname));
                    }
                    TrustCommand::Forget(hostname, reply) => {
                        let _ = reply.send(db.forget(&hostname));
                    }
                    TrustCommand::Shutdown => {
                        tracing::info!("Trust thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Check a certificate against the pin for `hostname`, pinning it when new
    pub async fn verify(
        &self,
        hostname: String,
        addresses: PeerAddresses,
        payload: Vec<u8>,
    ) -> Result<TrustDecision> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrustCommand::Verify { hostname, addresses, payload, reply }).await?;
        rx.await?
    }

    /// Get all pinned certificates
    pub async fn get_all(&self) -> Result<Vec<TrustedCertificate>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrustCommand::GetAll(reply)).await?;
        rx.await?
    }

    /// Get the pinned certificate for one hostname
    pub async fn get_one(&self, hostname: String) -> Result<Option<TrustedCertificate>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrustCommand::GetOne(hostname, reply)).await?;
        rx.await?
    }

    /// Drop the pin for a hostname so its next certificate is accepted
    pub async fn forget(&self, hostname: String) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrustCommand::Forget(hostname, reply)).await?;
        rx.await?
    }

    /// Shutdown the trust thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(TrustCommand::Shutdown).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_verify_through_thread() {
        let trust = TrustHandle::spawn(TrustDb::open(":memory:").unwrap());
        let addresses = PeerAddresses::new(Some(Ipv4Addr::LOCALHOST), None);

        let first = trust
            .verify("alice".to_string(), addresses, b"cert".to_vec())
            .await
            .unwrap();
        assert_eq!(first, TrustDecision::Installed);

        let second = trust
            .verify("alice".to_string(), addresses, b"other".to_vec())
            .await
            .unwrap();
        assert!(matches!(second, TrustDecision::Mismatch { .. }));

        assert_eq!(trust.get_all().await.unwrap().len(), 1);
        assert!(trust.get_one("alice".to_string()).await.unwrap().is_some());
        assert!(trust.forget("alice".to_string()).await.unwrap());
        assert!(trust.get_one("alice".to_string()).await.unwrap().is_none());

        trust.shutdown().await.unwrap();
        assert!(trust.get_all().await.is_err());
    }
}
