//! Regions visible to one provider, and the provider-region bindings.
//!
//! Regions are shared by every provider of a vendor: a region disappearing
//! from one provider's listing only detaches that provider. The region row
//! itself goes away once nothing is bound to it and it holds no zones.

use async_trait::async_trait;
use bridge_traits::cloud::RemoteRegion;
use bridge_traits::persistence::{Filter, Record, RecordStore};
use bridge_traits::LockService;
use core_inventory::models::{new_id, Cloudprovider, CloudproviderRegion, Cloudregion};
use core_inventory::Inventory;
use std::collections::HashSet;
use tracing::{debug, info};

use super::ResourceSync;
use crate::error::Result;

pub struct RegionSync {
    inventory: Inventory,
    provider: Cloudprovider,
    vendor: String,
    prefix: String,
    bound: HashSet<String>,
}

impl RegionSync {
    /// `prefix` is the driver's external-id prefix, e.g. `"aliyun/"`.
    pub async fn load(
        inventory: Inventory,
        provider: Cloudprovider,
        vendor: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let bound = inventory
            .bindings_of_provider(&provider.id)
            .await?
            .into_iter()
            .map(|binding| binding.cloudregion_id)
            .collect();
        Ok(Self {
            inventory,
            provider,
            vendor: vendor.into(),
            prefix: prefix.into(),
            bound,
        })
    }

    /// Vendor-scoped region id of a local region, without the prefix.
    pub fn remote_region_id<'a>(&self, region: &'a Cloudregion) -> &'a str {
        region
            .external_id
            .as_deref()
            .and_then(|id| id.strip_prefix(self.prefix.as_str()))
            .unwrap_or("")
    }
}

#[async_trait]
impl ResourceSync for RegionSync {
    type Local = Cloudregion;
    type Remote = RemoteRegion;

    fn store(&self) -> &dyn RecordStore<Cloudregion> {
        self.inventory.regions.as_ref()
    }

    fn parent_id(&self) -> &str {
        &self.prefix
    }

    async fn list_locals(&self) -> Result<Vec<Cloudregion>> {
        Ok(self
            .inventory
            .regions
            .list(&Filter::new().starts_with("external_id", &self.prefix))
            .await?)
    }

    fn local_key(&self, local: &Cloudregion) -> Option<String> {
        local.external_id.clone()
    }

    fn remote_key(&self, remote: &RemoteRegion) -> Option<String> {
        (!remote.global_id.is_empty()).then(|| format!("{}{}", self.prefix, remote.global_id))
    }

    fn remote_name<'a>(&self, remote: &'a RemoteRegion) -> &'a str {
        &remote.name
    }

    fn owns(&self, local: &Cloudregion) -> bool {
        self.bound.contains(&local.id)
    }

    async fn remove(&self, local: &Cloudregion) -> Result<()> {
        if let Some(binding) = self.inventory.binding(&self.provider.id, &local.id).await? {
            self.inventory.provider_regions.delete(&binding.id).await?;
            debug!(region_id = %local.id, provider_id = %self.provider.id, "Detached region");
        }

        let still_bound = !self.inventory.bindings_of_region(&local.id).await?.is_empty();
        let has_zones = !self.inventory.zones_of_region(&local.id).await?.is_empty();
        if !still_bound && !has_zones {
            self.inventory.regions.delete(&local.id).await?;
            info!(region_id = %local.id, "Deleted unused region");
        }
        Ok(())
    }

    fn apply_remote(&self, local: &mut Cloudregion, remote: &RemoteRegion) {
        local.status = remote.status.clone();
        local.is_emulated = remote.is_emulated;
        local.i18n = remote.i18n.clone();
    }

    fn create_local(&self, remote: &RemoteRegion, name: String) -> Cloudregion {
        Cloudregion {
            id: new_id(),
            name,
            external_id: Some(format!("{}{}", self.prefix, remote.global_id)),
            provider: self.vendor.clone(),
            status: remote.status.clone(),
            is_emulated: remote.is_emulated,
            i18n: remote.i18n.clone(),
        }
    }
}

/// Make sure `provider` is bound to every region in `regions` and that each
/// binding carries the provider's capabilities.
pub async fn ensure_bindings(
    inventory: &Inventory,
    locks: &dyn LockService,
    provider: &Cloudprovider,
    regions: &[Cloudregion],
) -> Result<Vec<CloudproviderRegion>> {
    let _guard = locks
        .lock_object(CloudproviderRegion::KEYWORD, &provider.id)
        .await?;

    let mut bindings = Vec::with_capacity(regions.len());
    for region in regions {
        let binding = match inventory.binding(&provider.id, &region.id).await? {
            Some(binding) if binding.capabilities == provider.capabilities => binding,
            Some(binding) => {
                let capabilities = provider.capabilities.clone();
                inventory
                    .provider_regions
                    .update(
                        &binding.id,
                        Box::new(move |b: &mut CloudproviderRegion| b.capabilities = capabilities),
                    )
                    .await?
                    .after
            }
            None => {
                debug!(provider_id = %provider.id, region_id = %region.id, "Binding region");
                inventory
                    .provider_regions
                    .insert(CloudproviderRegion::new(provider, region))
                    .await?
            }
        };
        bindings.push(binding);
    }
    Ok(bindings)
}

/// Bind an on-premise provider to the default region, creating the region
/// on first use.
pub async fn ensure_default_region(
    inventory: &Inventory,
    locks: &dyn LockService,
    provider: &Cloudprovider,
) -> Result<CloudproviderRegion> {
    let region = {
        let default = Cloudregion::default_region();
        let _guard = locks.lock_object(Cloudregion::KEYWORD, &default.id).await?;
        match inventory.regions.find_by_id(&default.id).await? {
            Some(region) => region,
            None => inventory.regions.insert(default).await?,
        }
    };

    let mut bindings = ensure_bindings(inventory, locks, provider, std::slice::from_ref(&region)).await?;
    Ok(bindings.remove(0))
}

#[cfg(test)]
mod tests {
    use super::super::testing::reconciler;
    use super::super::ReconcileOptions;
    use super::*;
    use bridge_local::LocalLockManager;
    use core_inventory::models::{Cloudaccount, Zone, DEFAULT_REGION_ID};

    fn remote(global_id: &str, name: &str) -> RemoteRegion {
        RemoteRegion {
            global_id: global_id.to_string(),
            name: name.to_string(),
            status: "inservice".to_string(),
            i18n: Default::default(),
            is_emulated: false,
        }
    }

    async fn sync_once(
        inventory: &Inventory,
        provider: &Cloudprovider,
        remotes: Vec<RemoteRegion>,
    ) -> crate::result::SyncResult {
        let (reconciler, _audit) = reconciler();
        let sync = RegionSync::load(inventory.clone(), provider.clone(), "Aliyun", "aliyun/")
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile(&sync, remotes, ReconcileOptions::default())
            .await
            .unwrap();
        let regions: Vec<Cloudregion> = outcome.locals().cloned().collect();
        ensure_bindings(inventory, &LocalLockManager::new(), provider, &regions)
            .await
            .unwrap();
        outcome.result
    }

    #[tokio::test]
    async fn test_regions_are_shared_between_providers() {
        let inventory = Inventory::in_memory();
        let account = Cloudaccount::new("acc", "aliyun");
        let p1 = Cloudprovider::new(&account, "p1");
        let p2 = Cloudprovider::new(&account, "p2");

        let first = sync_once(&inventory, &p1, vec![remote("cn-hangzhou", "Hangzhou")]).await;
        assert_eq!(first.added, 1);
        let second = sync_once(
            &inventory,
            &p2,
            vec![remote("cn-hangzhou", "Hangzhou"), remote("cn-beijing", "Beijing")],
        )
        .await;
        assert_eq!(second.added, 1);
        assert_eq!(second.deleted, 0);

        let regions = inventory.regions.list(&Filter::new()).await.unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(inventory.bindings_of_provider(&p1.id).await.unwrap().len(), 1);
        assert_eq!(inventory.bindings_of_provider(&p2.id).await.unwrap().len(), 2);

        // p1 must not touch the region only p2 is bound to
        let again = sync_once(&inventory, &p1, vec![remote("cn-hangzhou", "Hangzhou")]).await;
        assert!(again.is_unchanged());
    }

    #[tokio::test]
    async fn test_vanished_region_detaches_then_deletes_when_unused() {
        let inventory = Inventory::in_memory();
        let account = Cloudaccount::new("acc", "aliyun");
        let p1 = Cloudprovider::new(&account, "p1");
        let p2 = Cloudprovider::new(&account, "p2");
        let both = vec![remote("cn-hangzhou", "Hangzhou")];
        sync_once(&inventory, &p1, both.clone()).await;
        sync_once(&inventory, &p2, both).await;
        let region = inventory.regions.list(&Filter::new()).await.unwrap().remove(0);

        let result = sync_once(&inventory, &p1, vec![remote("cn-shanghai", "Shanghai")]).await;
        assert_eq!(result.deleted, 1);
        assert!(inventory.binding(&p1.id, &region.id).await.unwrap().is_none());
        assert!(inventory.regions.find_by_id(&region.id).await.unwrap().is_some());

        inventory
            .zones
            .insert(Zone {
                id: "z1".to_string(),
                name: "hz-a".to_string(),
                external_id: Some("cn-hangzhou-a".to_string()),
                cloudregion_id: region.id.clone(),
                status: "enable".to_string(),
                is_emulated: false,
                i18n: Default::default(),
            })
            .await
            .unwrap();
        sync_once(&inventory, &p2, vec![remote("cn-shanghai", "Shanghai")]).await;
        assert!(inventory.bindings_of_region(&region.id).await.unwrap().is_empty());
        // Zones keep the region alive
        assert!(inventory.regions.find_by_id(&region.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_binding_capabilities_follow_provider() {
        let inventory = Inventory::in_memory();
        let locks = LocalLockManager::new();
        let account = Cloudaccount::new("acc", "proxmox");
        let mut provider = Cloudprovider::new(&account, "pve");

        let binding = ensure_default_region(&inventory, &locks, &provider).await.unwrap();
        assert_eq!(binding.cloudregion_id, DEFAULT_REGION_ID);
        assert!(binding.capabilities.is_empty());

        provider.capabilities = vec!["compute".to_string()];
        let binding = ensure_default_region(&inventory, &locks, &provider).await.unwrap();
        assert_eq!(binding.capabilities, vec!["compute".to_string()]);
        assert_eq!(inventory.bindings_of_provider(&provider.id).await.unwrap().len(), 1);
    }
}
