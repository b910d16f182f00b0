//! Typed access to every record store the sync engine touches.

use bridge_local::MemoryRecordStore;
use bridge_traits::persistence::{Filter, RecordStore};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{
    Cloudaccount, Cloudprovider, CloudproviderRegion, Cloudregion, ExternalProject, Host,
    InterVpcNetwork, ProjectMappingRule, Vpc, Zone,
};

/// Bundle of record stores, one per model.
#[derive(Clone)]
pub struct Inventory {
    pub accounts: Arc<dyn RecordStore<Cloudaccount>>,
    pub providers: Arc<dyn RecordStore<Cloudprovider>>,
    pub provider_regions: Arc<dyn RecordStore<CloudproviderRegion>>,
    pub regions: Arc<dyn RecordStore<Cloudregion>>,
    pub zones: Arc<dyn RecordStore<Zone>>,
    pub hosts: Arc<dyn RecordStore<Host>>,
    pub vpcs: Arc<dyn RecordStore<Vpc>>,
    pub inter_vpc_networks: Arc<dyn RecordStore<InterVpcNetwork>>,
    pub external_projects: Arc<dyn RecordStore<ExternalProject>>,
    pub project_mappings: Arc<dyn RecordStore<ProjectMappingRule>>,
}

impl Inventory {
    /// Inventory backed by empty in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            accounts: Arc::new(MemoryRecordStore::<Cloudaccount>::new()),
            providers: Arc::new(MemoryRecordStore::<Cloudprovider>::new()),
            provider_regions: Arc::new(MemoryRecordStore::<CloudproviderRegion>::new()),
            regions: Arc::new(MemoryRecordStore::<Cloudregion>::new()),
            zones: Arc::new(MemoryRecordStore::<Zone>::new()),
            hosts: Arc::new(MemoryRecordStore::<Host>::new()),
            vpcs: Arc::new(MemoryRecordStore::<Vpc>::new()),
            inter_vpc_networks: Arc::new(MemoryRecordStore::<InterVpcNetwork>::new()),
            external_projects: Arc::new(MemoryRecordStore::<ExternalProject>::new()),
            project_mappings: Arc::new(MemoryRecordStore::<ProjectMappingRule>::new()),
        }
    }

    pub async fn account(&self, id: &str) -> Result<Cloudaccount> {
        Ok(self.accounts.fetch_by_id(id).await?)
    }

    pub async fn provider(&self, id: &str) -> Result<Cloudprovider> {
        Ok(self.providers.fetch_by_id(id).await?)
    }

    pub async fn providers_of_account(&self, account_id: &str) -> Result<Vec<Cloudprovider>> {
        Ok(self
            .providers
            .list(&Filter::new().equals("cloudaccount_id", account_id))
            .await?)
    }

    pub async fn enabled_providers(&self, account_id: &str) -> Result<Vec<Cloudprovider>> {
        Ok(self
            .providers
            .list(
                &Filter::new()
                    .equals("cloudaccount_id", account_id)
                    .is_true("enabled"),
            )
            .await?)
    }

    pub async fn bindings_of_provider(&self, provider_id: &str) -> Result<Vec<CloudproviderRegion>> {
        Ok(self
            .provider_regions
            .list(&Filter::new().equals("cloudprovider_id", provider_id))
            .await?)
    }

    pub async fn bindings_of_region(&self, region_id: &str) -> Result<Vec<CloudproviderRegion>> {
        Ok(self
            .provider_regions
            .list(&Filter::new().equals("cloudregion_id", region_id))
            .await?)
    }

    pub async fn binding(
        &self,
        provider_id: &str,
        region_id: &str,
    ) -> Result<Option<CloudproviderRegion>> {
        let mut found = self
            .provider_regions
            .list(
                &Filter::new()
                    .equals("cloudprovider_id", provider_id)
                    .equals("cloudregion_id", region_id),
            )
            .await?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.remove(0))
        })
    }

    pub async fn zones_of_region(&self, region_id: &str) -> Result<Vec<Zone>> {
        Ok(self
            .zones
            .list(&Filter::new().equals("cloudregion_id", region_id))
            .await?)
    }

    pub async fn host_count_in_zone(&self, zone_id: &str) -> Result<usize> {
        Ok(self
            .hosts
            .count(&Filter::new().equals("zone_id", zone_id))
            .await?)
    }

    pub async fn vpcs_of(&self, provider_id: &str, region_id: &str) -> Result<Vec<Vpc>> {
        Ok(self
            .vpcs
            .list(
                &Filter::new()
                    .equals("manager_id", provider_id)
                    .equals("cloudregion_id", region_id),
            )
            .await?)
    }
}
