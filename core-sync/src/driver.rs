//! Registry of cloud driver factories, keyed by vendor.

use bridge_traits::cloud::{CloudDriver, CloudDriverFactory, ProviderCredentials};
use bridge_traits::CredentialVault;
use core_inventory::models::Cloudprovider;
use core_runtime::logging::redact_url_credentials;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Result, SyncError};

pub struct DriverRegistry {
    factories: RwLock<HashMap<String, Arc<dyn CloudDriverFactory>>>,
    vault: Arc<dyn CredentialVault>,
}

impl DriverRegistry {
    pub fn new(vault: Arc<dyn CredentialVault>) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            vault,
        }
    }

    /// Register `factory` for its vendor, replacing any previous one.
    pub async fn register(&self, factory: Arc<dyn CloudDriverFactory>) {
        let vendor = factory.vendor().to_ascii_lowercase();
        info!(vendor = %vendor, "Registered cloud driver factory");
        self.factories.write().await.insert(vendor, factory);
    }

    pub async fn vendors(&self) -> Vec<String> {
        let mut vendors: Vec<String> = self.factories.read().await.keys().cloned().collect();
        vendors.sort();
        vendors
    }

    /// Connect a driver for `provider` with its decrypted credentials.
    pub async fn connect(&self, provider: &Cloudprovider) -> Result<Arc<dyn CloudDriver>> {
        let vendor = provider.provider.to_ascii_lowercase();
        let factory = self
            .factories
            .read()
            .await
            .get(&vendor)
            .cloned()
            .ok_or_else(|| SyncError::DriverNotFound {
                vendor: provider.provider.clone(),
            })?;

        let secret = if provider.secret.is_empty() {
            String::new()
        } else {
            self.vault.decrypt(&provider.id, &provider.secret).await?
        };
        debug!(
            provider_id = %provider.id,
            access_url = %redact_url_credentials(&provider.access_url),
            "Connecting cloud driver"
        );

        let credentials = ProviderCredentials {
            provider_id: provider.id.clone(),
            provider_name: provider.name.clone(),
            vendor: provider.provider.clone(),
            access_url: provider.access_url.clone(),
            account: provider.account.clone(),
            secret,
        };
        Ok(factory.connect(credentials).await?)
    }
}
