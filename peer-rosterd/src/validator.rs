use std::future::Future;
use std::pin::Pin;
use shared::types::PeerAddresses;
use crate::trust::db::TrustDecision;
use crate::trust_store::TrustHandle;

pub type ValidateFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Decides whether a certificate received during registration is trusted.
///
/// `false` is a refusal from the peer's identity, not a transport failure:
/// workers stop retrying when they get it.
pub trait CertificateValidator: Send + Sync {
    fn validate<'a>(
        &'a self,
        hostname: &'a str,
        addresses: &'a PeerAddresses,
        payload: &'a [u8],
    ) -> ValidateFuture<'a>;
}

/// Trust-on-first-use validation against the trust store
pub struct TrustStoreValidator {
    store: TrustHandle,
}

impl TrustStoreValidator {
    pub fn new(store: TrustHandle) -> Self {
        Self { store }
    }
}

impl CertificateValidator for TrustStoreValidator {
    fn validate<'a>(
        &'a self,
        hostname: &'a str,
        addresses: &'a PeerAddresses,
        payload: &'a [u8],
    ) -> ValidateFuture<'a> {
        Box::pin(async move {
            if payload.is_empty() {
                tracing::warn!("Empty certificate from {}", hostname);
                return false;
            }

            match self
                .store
                .verify(hostname.to_string(), *addresses, payload.to_vec())
                .await
            {
                Ok(TrustDecision::Installed) => {
                    tracing::info!("Pinned new certificate for {}", hostname);
                    true
                }
                Ok(TrustDecision::Matched) => true,
                Ok(TrustDecision::Mismatch { pinned }) => {
                    tracing::warn!(
                        "Certificate from {} does not match pinned fingerprint {}",
                        hostname,
                        pinned
                    );
                    false
                }
                Err(e) => {
                    tracing::error!("Failed to verify certificate from {}: {}", hostname, e);
                    false
                }
            }
        })
    }
}
