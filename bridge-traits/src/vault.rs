//! Credential Vault
//!
//! Provider secrets are persisted encrypted. The engine asks the vault for
//! plaintext only at the moment it connects a driver.

use async_trait::async_trait;

use crate::error::Result;

/// Encrypts and decrypts provider secrets.
///
/// `owner_id` is the id of the record the secret belongs to; implementations
/// may use it as key-derivation context.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn encrypt(&self, owner_id: &str, plaintext: &str) -> Result<String>;

    async fn decrypt(&self, owner_id: &str, ciphertext: &str) -> Result<String>;
}
