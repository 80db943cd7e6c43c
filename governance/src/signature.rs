//! Detached signature verification boundary
//!
//! The engine only builds domain-separated digests; checking a signature
//! against them is the job of a [`SignatureVerifier`].

use crate::config::RelayConfig;
use crate::error::{GovernanceError, Result};
use crate::hash::FieldHasher;
use crate::types::Address;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

const DOMAIN_TAG: &str = "CIVIC_DOMAIN_V1";
const SIGNED_TAG: &str = "CIVIC_SIGNED_V1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: String,
}

impl SignatureDomain {
    pub fn separator(&self) -> [u8; 32] {
        let mut h = FieldHasher::new(DOMAIN_TAG);
        h.str(&self.name)
            .str(&self.version)
            .u64(self.chain_id)
            .str(&self.verifying_contract.to_ascii_lowercase());
        h.finish()
    }
}

impl From<&RelayConfig> for SignatureDomain {
    fn from(c: &RelayConfig) -> Self {
        Self {
            name: c.domain_name.clone(),
            version: c.domain_version.clone(),
            chain_id: c.chain_id,
            verifying_contract: c.verifying_contract.clone(),
        }
    }
}

/// Bytes a signer actually signs: domain separator bound to a payload digest
pub fn signing_message(domain: &SignatureDomain, payload_digest: &[u8; 32]) -> [u8; 32] {
    let mut h = FieldHasher::new(SIGNED_TAG);
    h.bytes(&domain.separator()).bytes(payload_digest);
    h.finish()
}

#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// `Ok(false)` for a well-formed but wrong signature; `Err` only when the
    /// verifier itself cannot answer
    async fn verify(
        &self,
        domain: &SignatureDomain,
        payload_digest: &[u8; 32],
        signature: &[u8],
        expected_signer: &Address,
    ) -> Result<bool>;
}

/// Verifies Ed25519 signatures against registered address bindings
#[derive(Default)]
pub struct Ed25519Verifier {
    keys: RwLock<HashMap<Address, VerifyingKey>>,
}

impl Ed25519Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, address: Address, key: VerifyingKey) {
        self.keys.write().await.insert(address, key);
    }

    pub async fn register_hex(&self, address: Address, key_hex: &str) -> Result<()> {
        let bytes = hex::decode(key_hex.trim_start_matches("0x"))
            .map_err(|e| GovernanceError::InvalidInput(format!("bad public key hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GovernanceError::InvalidInput("public key must be 32 bytes".to_string()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| GovernanceError::InvalidInput(format!("bad public key: {}", e)))?;
        self.register(address, key).await;
        Ok(())
    }
}

#[async_trait]
impl SignatureVerifier for Ed25519Verifier {
    async fn verify(
        &self,
        domain: &SignatureDomain,
        payload_digest: &[u8; 32],
        signature: &[u8],
        expected_signer: &Address,
    ) -> Result<bool> {
        let keys = self.keys.read().await;
        let Some(key) = keys.get(expected_signer) else {
            debug!(signer = %expected_signer, "no_registered_key");
            return Ok(false);
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return Ok(false);
        };
        let message = signing_message(domain, payload_digest);
        Ok(key.verify(&message, &sig).is_ok())
    }
}
