//! Domain models for the cloud inventory
//!
//! Accounts and providers are configured by operators; regions, zones, VPCs,
//! inter-VPC networks and external projects mirror remote state and are
//! written by the sync engine.

use bridge_traits::cloud::I18nNames;
use bridge_traits::persistence::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Id of the region on-premise providers are bound to.
pub const DEFAULT_REGION_ID: &str = "default";

/// Generate a fresh record id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Status Types
// =============================================================================

/// Synchronization lifecycle of accounts, providers and provider-region bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Queuing,
    Queued,
    Syncing,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Queuing => "queuing",
            SyncStatus::Queued => "queued",
            SyncStatus::Syncing => "syncing",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SyncStatus::Idle)
    }

    /// Queued for a sync that has not started touching remote state yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, SyncStatus::Queuing | SyncStatus::Queued)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncStatus::Idle),
            "queuing" => Ok(SyncStatus::Queuing),
            "queued" => Ok(SyncStatus::Queued),
            "syncing" => Ok(SyncStatus::Syncing),
            _ => Err(format!("Invalid sync status: {}", s)),
        }
    }
}

/// Connectivity of a provider as last observed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    Connected,
    Disconnected,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Connected => "connected",
            ProviderStatus::Disconnected => "disconnected",
        }
    }
}

/// Account health reported by the vendor (billing state, permissions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "insufficient")]
    Insufficient,
    #[serde(rename = "suspended")]
    Suspended,
    #[serde(rename = "arrears")]
    Arrears,
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "no permission")]
    NoPermission,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Normal => "normal",
            HealthStatus::Insufficient => "insufficient",
            HealthStatus::Suspended => "suspended",
            HealthStatus::Arrears => "arrears",
            HealthStatus::Unknown => "unknown",
            HealthStatus::NoPermission => "no permission",
        }
    }

    /// Health states in which the provider can still be synced.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            HealthStatus::Normal | HealthStatus::Insufficient | HealthStatus::Unknown
        )
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Sync bookkeeping embedded in every syncable entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub sync_status: SyncStatus,
    /// Start of the most recent sync.
    pub last_sync: Option<DateTime<Utc>>,
    pub last_sync_end_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
}

/// Entity that runs through the sync lifecycle.
pub trait Syncable: Record {
    fn sync_state(&self) -> &SyncState;

    fn sync_state_mut(&mut self) -> &mut SyncState;

    fn sync_status(&self) -> SyncStatus {
        self.sync_state().sync_status
    }
}

/// Entity an operator can switch off.
pub trait Enableable {
    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);
}

macro_rules! impl_syncable {
    ($ty:ty) => {
        impl Syncable for $ty {
            fn sync_state(&self) -> &SyncState {
                &self.sync
            }

            fn sync_state_mut(&mut self) -> &mut SyncState {
                &mut self.sync
            }
        }

        impl Enableable for $ty {
            fn is_enabled(&self) -> bool {
                self.enabled
            }

            fn set_enabled(&mut self, enabled: bool) {
                self.enabled = enabled;
            }
        }
    };
}

fn opt(value: &Option<String>) -> Option<String> {
    value.clone()
}

// =============================================================================
// Configured Entities
// =============================================================================

/// Credentials root of one cloud tenancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cloudaccount {
    pub id: String,
    pub name: String,
    /// Vendor name (`"aliyun"`, `"huawei"`, `"proxmox"`, ...).
    pub provider: String,
    pub enabled: bool,
    pub project_mapping_id: Option<String>,
    pub enable_project_sync: bool,
    pub enable_resource_sync: bool,
    #[serde(flatten)]
    pub sync: SyncState,
}

impl Cloudaccount {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            provider: provider.into(),
            enabled: true,
            project_mapping_id: None,
            enable_project_sync: false,
            enable_resource_sync: false,
            sync: SyncState::default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Cloudaccount name cannot be empty".to_string());
        }
        if self.provider.trim().is_empty() {
            return Err("Cloudaccount provider cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Record for Cloudaccount {
    const KEYWORD: &'static str = "cloudaccount";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "provider" => Some(self.provider.clone()),
            "enabled" => Some(self.enabled.to_string()),
            "project_mapping_id" => opt(&self.project_mapping_id),
            "sync_status" => Some(self.sync.sync_status.to_string()),
            _ => None,
        }
    }
}

impl_syncable!(Cloudaccount);

/// One API endpoint/subscription of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cloudprovider {
    pub id: String,
    pub name: String,
    pub cloudaccount_id: String,
    pub provider: String,
    pub enabled: bool,
    pub status: ProviderStatus,
    pub health_status: HealthStatus,
    pub access_url: String,
    pub account: String,
    /// Secret as stored by the credential vault.
    pub secret: String,
    /// Local project owning resources of this provider.
    pub project_id: String,
    pub project_mapping_id: Option<String>,
    pub enable_project_sync: bool,
    pub enable_resource_sync: bool,
    pub capabilities: Vec<String>,
    #[serde(flatten)]
    pub sync: SyncState,
}

impl Cloudprovider {
    pub fn new(account: &Cloudaccount, name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            cloudaccount_id: account.id.clone(),
            provider: account.provider.clone(),
            enabled: true,
            status: ProviderStatus::Connected,
            health_status: HealthStatus::Normal,
            access_url: String::new(),
            account: String::new(),
            secret: String::new(),
            project_id: "system".to_string(),
            project_mapping_id: None,
            enable_project_sync: false,
            enable_resource_sync: false,
            capabilities: Vec::new(),
            sync: SyncState::default(),
        }
    }

    /// Enabled, connected and in a usable health state.
    pub fn is_available(&self) -> bool {
        self.enabled
            && self.status == ProviderStatus::Connected
            && self.health_status.is_usable()
    }
}

impl Record for Cloudprovider {
    const KEYWORD: &'static str = "cloudprovider";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "cloudaccount_id" => Some(self.cloudaccount_id.clone()),
            "provider" => Some(self.provider.clone()),
            "enabled" => Some(self.enabled.to_string()),
            "status" => Some(self.status.as_str().to_string()),
            "health_status" => Some(self.health_status.as_str().to_string()),
            "project_mapping_id" => opt(&self.project_mapping_id),
            "sync_status" => Some(self.sync.sync_status.to_string()),
            _ => None,
        }
    }
}

impl_syncable!(Cloudprovider);

/// Binding of a provider to one region it can reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudproviderRegion {
    pub id: String,
    pub name: String,
    pub cloudprovider_id: String,
    pub cloudregion_id: String,
    pub enabled: bool,
    pub capabilities: Vec<String>,
    #[serde(flatten)]
    pub sync: SyncState,
}

impl CloudproviderRegion {
    pub fn new(provider: &Cloudprovider, region: &Cloudregion) -> Self {
        Self {
            id: new_id(),
            name: format!("{}/{}", provider.name, region.name),
            cloudprovider_id: provider.id.clone(),
            cloudregion_id: region.id.clone(),
            enabled: true,
            capabilities: provider.capabilities.clone(),
            sync: SyncState::default(),
        }
    }
}

impl Record for CloudproviderRegion {
    const KEYWORD: &'static str = "cloudproviderregion";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "cloudprovider_id" => Some(self.cloudprovider_id.clone()),
            "cloudregion_id" => Some(self.cloudregion_id.clone()),
            "enabled" => Some(self.enabled.to_string()),
            "sync_status" => Some(self.sync.sync_status.to_string()),
            _ => None,
        }
    }
}

impl_syncable!(CloudproviderRegion);

// =============================================================================
// Mirrored Resources
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cloudregion {
    pub id: String,
    pub name: String,
    /// `None` for regions created locally (the default region).
    pub external_id: Option<String>,
    pub provider: String,
    pub status: String,
    pub is_emulated: bool,
    #[serde(default)]
    pub i18n: I18nNames,
}

impl Cloudregion {
    /// Region that on-premise providers attach to.
    pub fn default_region() -> Self {
        Self {
            id: DEFAULT_REGION_ID.to_string(),
            name: "Default".to_string(),
            external_id: None,
            provider: "OneCloud".to_string(),
            status: "inservice".to_string(),
            is_emulated: false,
            i18n: I18nNames::new(),
        }
    }
}

impl Record for Cloudregion {
    const KEYWORD: &'static str = "cloudregion";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "external_id" => opt(&self.external_id),
            "provider" => Some(self.provider.clone()),
            "status" => Some(self.status.clone()),
            "is_emulated" => Some(self.is_emulated.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub external_id: Option<String>,
    pub cloudregion_id: String,
    pub status: String,
    pub is_emulated: bool,
    #[serde(default)]
    pub i18n: I18nNames,
}

impl Record for Zone {
    const KEYWORD: &'static str = "zone";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "external_id" => opt(&self.external_id),
            "cloudregion_id" => Some(self.cloudregion_id.clone()),
            "status" => Some(self.status.clone()),
            "is_emulated" => Some(self.is_emulated.to_string()),
            _ => None,
        }
    }
}

/// Physical or virtual host. Only referenced by the engine (scope
/// resolution, zone deletion checks); hosts are synced elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub external_id: Option<String>,
    pub zone_id: String,
    pub manager_id: Option<String>,
    pub status: String,
}

impl Record for Host {
    const KEYWORD: &'static str = "host";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "external_id" => opt(&self.external_id),
            "zone_id" => Some(self.zone_id.clone()),
            "manager_id" => opt(&self.manager_id),
            "status" => Some(self.status.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub name: String,
    pub external_id: Option<String>,
    pub cloudregion_id: String,
    pub manager_id: String,
    pub status: String,
    pub cidr_block: String,
    pub is_default: bool,
    pub is_emulated: bool,
    pub project_id: String,
}

impl Record for Vpc {
    const KEYWORD: &'static str = "vpc";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "external_id" => opt(&self.external_id),
            "cloudregion_id" => Some(self.cloudregion_id.clone()),
            "manager_id" => Some(self.manager_id.clone()),
            "status" => Some(self.status.clone()),
            "is_default" => Some(self.is_default.to_string()),
            "project_id" => Some(self.project_id.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterVpcNetwork {
    pub id: String,
    pub name: String,
    pub external_id: Option<String>,
    pub manager_id: String,
    pub status: String,
    /// Local ids of member VPCs.
    pub vpc_ids: Vec<String>,
    pub project_id: String,
}

impl Record for InterVpcNetwork {
    const KEYWORD: &'static str = "inter_vpc_network";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "external_id" => opt(&self.external_id),
            "manager_id" => Some(self.manager_id.clone()),
            "status" => Some(self.status.clone()),
            "project_id" => Some(self.project_id.clone()),
            _ => None,
        }
    }
}

/// Remote tenant/project of a provider and the local project it maps onto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalProject {
    pub id: String,
    pub name: String,
    pub external_id: Option<String>,
    pub manager_id: String,
    pub status: String,
    pub project_id: String,
}

impl Record for ExternalProject {
    const KEYWORD: &'static str = "externalproject";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "external_id" => opt(&self.external_id),
            "manager_id" => Some(self.manager_id.clone()),
            "status" => Some(self.status.clone()),
            "project_id" => Some(self.project_id.clone()),
            _ => None,
        }
    }
}

// =============================================================================
// Project Mapping
// =============================================================================

/// One matching rule of a [`ProjectMappingRule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRule {
    /// Matches resources whose name starts with this prefix; `None` matches all.
    pub name_prefix: Option<String>,
    pub project_id: String,
}

impl ProjectRule {
    pub fn matches(&self, resource_name: &str) -> bool {
        self.name_prefix
            .as_deref()
            .map_or(true, |prefix| resource_name.starts_with(prefix))
    }
}

/// Ordered rules assigning synced resources to local projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMappingRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub rules: Vec<ProjectRule>,
}

impl ProjectMappingRule {
    /// Project of the first rule matching `resource_name`.
    pub fn resolve(&self, resource_name: &str) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| rule.matches(resource_name))
            .map(|rule| rule.project_id.as_str())
    }
}

impl Record for ProjectMappingRule {
    const KEYWORD: &'static str = "project_mapping";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn field(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "enabled" => Some(self.enabled.to_string()),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_round_trip() {
        for status in [
            SyncStatus::Idle,
            SyncStatus::Queuing,
            SyncStatus::Queued,
            SyncStatus::Syncing,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("error".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_sync_status_predicates() {
        assert!(SyncStatus::Idle.is_idle());
        assert!(SyncStatus::Queuing.is_pending());
        assert!(SyncStatus::Queued.is_pending());
        assert!(!SyncStatus::Syncing.is_pending());
    }

    #[test]
    fn test_provider_availability() {
        let account = Cloudaccount::new("acc", "aliyun");
        let mut provider = Cloudprovider::new(&account, "prod");
        assert!(provider.is_available());

        provider.health_status = HealthStatus::Suspended;
        assert!(!provider.is_available());

        provider.health_status = HealthStatus::Normal;
        provider.status = ProviderStatus::Disconnected;
        assert!(!provider.is_available());

        provider.status = ProviderStatus::Connected;
        provider.set_enabled(false);
        assert!(!provider.is_available());
    }

    #[test]
    fn test_provider_fields_for_filters() {
        let account = Cloudaccount::new("acc", "aliyun");
        let provider = Cloudprovider::new(&account, "prod");

        assert_eq!(
            provider.field("cloudaccount_id").as_deref(),
            Some(account.id.as_str())
        );
        assert_eq!(provider.field("enabled").as_deref(), Some("true"));
        assert_eq!(provider.field("sync_status").as_deref(), Some("idle"));
        assert_eq!(provider.field("project_mapping_id"), None);
        assert_eq!(provider.field("bogus"), None);
    }

    #[test]
    fn test_account_validation() {
        let mut account = Cloudaccount::new("acc", "aliyun");
        assert!(account.validate().is_ok());
        account.name = "  ".to_string();
        assert!(account.validate().is_err());
    }

    #[test]
    fn test_sync_state_flattens_into_record() {
        let account = Cloudaccount::new("acc", "aliyun");
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["sync_status"], "idle");
        assert!(json.get("sync").is_none());
    }

    #[test]
    fn test_health_status_serialization() {
        let json = serde_json::to_string(&HealthStatus::NoPermission).unwrap();
        assert_eq!(json, "\"no permission\"");
        assert!(!HealthStatus::Arrears.is_usable());
    }

    #[test]
    fn test_project_mapping_resolution() {
        let mapping = ProjectMappingRule {
            id: "m1".to_string(),
            name: "mapping".to_string(),
            enabled: true,
            rules: vec![
                ProjectRule {
                    name_prefix: Some("prod-".to_string()),
                    project_id: "production".to_string(),
                },
                ProjectRule {
                    name_prefix: None,
                    project_id: "fallback".to_string(),
                },
            ],
        };

        assert_eq!(mapping.resolve("prod-web"), Some("production"));
        assert_eq!(mapping.resolve("dev-web"), Some("fallback"));

        let disabled = ProjectMappingRule {
            enabled: false,
            ..mapping
        };
        assert_eq!(disabled.resolve("prod-web"), None);
    }

    #[test]
    fn test_binding_inherits_provider_capabilities() {
        let account = Cloudaccount::new("acc", "aliyun");
        let mut provider = Cloudprovider::new(&account, "prod");
        provider.capabilities = vec!["compute".to_string()];
        let region = Cloudregion::default_region();

        let binding = CloudproviderRegion::new(&provider, &region);
        assert_eq!(binding.cloudregion_id, DEFAULT_REGION_ID);
        assert_eq!(binding.capabilities, vec!["compute".to_string()]);
        assert!(binding.sync_status().is_idle());
    }
}
