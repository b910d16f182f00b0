//! Remote Provider Adapter
//!
//! Each cloud vendor (public clouds, private clouds, on-premise
//! virtualization) ships an implementation of [`CloudDriver`] together with a
//! [`CloudDriverFactory`] that connects it from stored credentials. The sync
//! engine only ever sees the transient `Remote*` records defined here.
//!
//! Drivers must map vendor failures onto
//! [`ProviderErrorKind`](crate::error::ProviderErrorKind). Listing a resource
//! type the vendor does not have is reported as `NotSupported` or
//! `NotImplemented`, which the engine treats as "nothing to sync".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{BridgeError, ProviderErrorKind, Result};

/// Localized display names keyed by language tag (`"en"`, `"zh_CN"`, ...).
pub type I18nNames = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRegion {
    /// Vendor-scoped identifier, without the driver's external-id prefix.
    pub global_id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub i18n: I18nNames,
    #[serde(default)]
    pub is_emulated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteZone {
    pub global_id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub i18n: I18nNames,
    #[serde(default)]
    pub is_emulated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVpc {
    pub global_id: String,
    pub name: String,
    pub status: String,
    pub cidr_block: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_emulated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteInterVpcNetwork {
    pub global_id: String,
    pub name: String,
    pub status: String,
    /// Global ids of member VPCs.
    #[serde(default)]
    pub vpc_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProject {
    pub global_id: String,
    pub name: String,
    pub status: String,
}

/// Decrypted connection parameters handed to a [`CloudDriverFactory`].
#[derive(Clone)]
pub struct ProviderCredentials {
    pub provider_id: String,
    pub provider_name: String,
    pub vendor: String,
    pub access_url: String,
    pub account: String,
    pub secret: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("provider_id", &self.provider_id)
            .field("provider_name", &self.provider_name)
            .field("vendor", &self.vendor)
            .field("access_url", &self.access_url)
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Connected view of one cloud provider.
#[async_trait]
pub trait CloudDriver: Send + Sync {
    /// Vendor name this driver speaks for.
    fn vendor(&self) -> &str;

    /// On-premise providers expose no regions; the engine binds them to the
    /// default region instead.
    fn is_on_premise(&self) -> bool {
        false
    }

    /// Prefix prepended to region global ids to form local external ids.
    fn region_external_id_prefix(&self) -> String {
        format!("{}/", self.vendor())
    }

    async fn get_capabilities(&self) -> Result<Vec<String>>;

    async fn list_regions(&self) -> Result<Vec<RemoteRegion>>;

    async fn list_zones(&self, region_id: &str) -> Result<Vec<RemoteZone>>;

    async fn list_vpcs(&self, region_id: &str) -> Result<Vec<RemoteVpc>>;

    async fn list_inter_vpc_networks(&self) -> Result<Vec<RemoteInterVpcNetwork>> {
        Err(BridgeError::provider(
            ProviderErrorKind::NotSupported,
            format!("{} has no inter-vpc networks", self.vendor()),
        ))
    }

    async fn list_projects(&self) -> Result<Vec<RemoteProject>> {
        Err(BridgeError::provider(
            ProviderErrorKind::NotSupported,
            format!("{} has no projects", self.vendor()),
        ))
    }
}

/// Builds connected drivers for one vendor.
#[async_trait]
pub trait CloudDriverFactory: Send + Sync {
    fn vendor(&self) -> &str;

    async fn connect(&self, credentials: ProviderCredentials) -> Result<Arc<dyn CloudDriver>>;
}
