//! Development credential vault

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    vault::CredentialVault,
};
use tracing::debug;

/// Reversible encoding bound to the owning record id.
///
/// This is NOT encryption. It keeps secrets out of casual log output in local
/// setups and tests; production hosts inject a real vault.
#[derive(Debug, Default, Clone)]
pub struct Base64CredentialVault;

impl Base64CredentialVault {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialVault for Base64CredentialVault {
    async fn encrypt(&self, owner_id: &str, plaintext: &str) -> Result<String> {
        Ok(STANDARD.encode(format!("{}:{}", owner_id, plaintext)))
    }

    async fn decrypt(&self, owner_id: &str, ciphertext: &str) -> Result<String> {
        let decoded = STANDARD
            .decode(ciphertext)
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to decode secret: {}", e)))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| BridgeError::OperationFailed(format!("Secret is not UTF-8: {}", e)))?;

        match decoded.split_once(':') {
            Some((owner, secret)) if owner == owner_id => {
                debug!(owner_id, "Decoded provider secret");
                Ok(secret.to_string())
            }
            _ => Err(BridgeError::OperationFailed(format!(
                "Secret does not belong to {}",
                owner_id
            ))),
        }
    }
}
