//! # Sync Scope
//!
//! What a sync request targets and how user-supplied identifiers become
//! canonical ids.
//!
//! ## Overview
//!
//! A [`SyncScope`] names regions, zones and hosts by id or by name. The
//! [`ScopeResolver`] rewrites them to ids and closes the sets upward: every
//! host pulls in its zone and region, every zone its region. Resolution is
//! all-or-nothing; the first unknown identifier fails with `NotFound`.

use core_inventory::Inventory;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};

/// Resource type names accepted in [`SyncScope::resources`].
pub mod resource {
    pub const PROJECT: &str = "project";
    pub const INTER_VPC_NETWORK: &str = "inter_vpc_network";
    pub const ZONE: &str = "zone";
    pub const VPC: &str = "vpc";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Resource types to sync; empty means all.
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub full_sync: bool,
    #[serde(default)]
    pub deep_sync: bool,
    /// Bypass admission control.
    #[serde(default)]
    pub force: bool,
}

impl SyncScope {
    /// Scope of a request that named no scope at all.
    pub fn full() -> Self {
        Self {
            full_sync: true,
            deep_sync: true,
            ..Self::default()
        }
    }

    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_zones<I, S>(mut self, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zones = zones.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Apply request defaults: no scope means a full deep sync; any filter or
    /// `full_sync` implies `deep_sync`.
    pub fn for_request(scope: Option<SyncScope>) -> Self {
        match scope {
            None => Self::full(),
            Some(mut scope) => {
                if scope.full_sync || scope.has_filter() {
                    scope.deep_sync = true;
                }
                scope
            }
        }
    }

    pub fn has_filter(&self) -> bool {
        !self.regions.is_empty()
            || !self.zones.is_empty()
            || !self.hosts.is_empty()
            || !self.resources.is_empty()
    }

    /// Whether the request asks for resource information at all.
    pub fn need_sync_info(&self) -> bool {
        self.full_sync || self.has_filter()
    }

    pub fn need_sync_resource(&self, resource: &str) -> bool {
        self.full_sync || self.resources.is_empty() || self.resources.iter().any(|r| r == resource)
    }

    /// Closed region set; empty means every region.
    pub fn region_ids(&self) -> &[String] {
        &self.regions
    }

    pub fn includes_region(&self, region_id: &str) -> bool {
        self.regions.is_empty() || self.regions.iter().any(|r| r == region_id)
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

/// Resolves scope identifiers against the inventory.
#[derive(Clone)]
pub struct ScopeResolver {
    inventory: Inventory,
}

impl ScopeResolver {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }

    /// Rewrite `scope` to canonical ids with upward closure.
    ///
    /// Zones whose region no longer exists, and hosts whose zone or region
    /// no longer exists, are dropped from the scope.
    pub async fn normalize(&self, scope: &mut SyncScope) -> Result<()> {
        let mut regions = Vec::new();
        let mut zones = Vec::new();
        let mut hosts = Vec::new();

        for ident in &scope.regions {
            let region = self
                .inventory
                .regions
                .fetch_by_id_or_name(ident)
                .await
                .map_err(|e| not_found_as("cloudregion", ident, e))?;
            push_unique(&mut regions, &region.id);
        }

        for ident in &scope.zones {
            let zone = self
                .inventory
                .zones
                .fetch_by_id_or_name(ident)
                .await
                .map_err(|e| not_found_as("zone", ident, e))?;
            let Some(region) = self.inventory.regions.find_by_id(&zone.cloudregion_id).await? else {
                debug!(zone_id = %zone.id, "Zone without region left out of scope");
                continue;
            };
            push_unique(&mut zones, &zone.id);
            push_unique(&mut regions, &region.id);
        }

        for ident in &scope.hosts {
            let host = self
                .inventory
                .hosts
                .fetch_by_id_or_name(ident)
                .await
                .map_err(|e| not_found_as("host", ident, e))?;
            let Some(zone) = self.inventory.zones.find_by_id(&host.zone_id).await? else {
                debug!(host_id = %host.id, "Host without zone left out of scope");
                continue;
            };
            let Some(region) = self.inventory.regions.find_by_id(&zone.cloudregion_id).await? else {
                debug!(host_id = %host.id, "Host without region left out of scope");
                continue;
            };
            push_unique(&mut hosts, &host.id);
            push_unique(&mut zones, &zone.id);
            push_unique(&mut regions, &region.id);
        }

        scope.regions = regions;
        scope.zones = zones;
        scope.hosts = hosts;
        Ok(())
    }
}

/// Report a failed lookup under the identifier the caller supplied.
fn not_found_as(
    entity_type: &str,
    ident: &str,
    err: bridge_traits::error::BridgeError,
) -> SyncError {
    match err {
        bridge_traits::error::BridgeError::NotFound { .. } => SyncError::not_found(entity_type, ident),
        other => other.into(),
    }
}
