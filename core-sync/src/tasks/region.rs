//! Sync of one provider-region binding: zones, then VPCs.

use async_trait::async_trait;
use bridge_traits::cloud::CloudDriver;
use core_inventory::models::{Cloudprovider, Cloudregion, DEFAULT_REGION_ID};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{health, optional_listing, owned_elsewhere, StageOutcome, StagedTask, SyncContext};
use crate::error::{Result, SyncError};
use crate::job::TaskStage;
use crate::result::SyncResult;
use crate::scope::{resource, SyncScope};
use crate::synchronizer::{ReconcileOptions, VpcSync, ZoneSync};

pub struct RegionSyncTask {
    binding_id: String,
    provider: Cloudprovider,
    driver: Arc<dyn CloudDriver>,
    scope: SyncScope,
    region: Option<Cloudregion>,
    result: SyncResult,
}

impl RegionSyncTask {
    pub fn new(
        binding_id: impl Into<String>,
        provider: Cloudprovider,
        driver: Arc<dyn CloudDriver>,
        scope: SyncScope,
    ) -> Self {
        Self {
            binding_id: binding_id.into(),
            provider,
            driver,
            scope,
            region: None,
            result: SyncResult::new(),
        }
    }

    /// Region id as the driver knows it; empty for the default region.
    fn remote_region_id(&self, region: &Cloudregion) -> String {
        if region.id == DEFAULT_REGION_ID {
            return String::new();
        }
        let prefix = self.driver.region_external_id_prefix();
        region
            .external_id
            .as_deref()
            .and_then(|id| id.strip_prefix(prefix.as_str()))
            .unwrap_or_default()
            .to_string()
    }

    fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            allow_mass_delete: self.scope.full_sync,
        }
    }

    async fn sync_resources(&mut self, ctx: &SyncContext, region: Cloudregion) -> Result<()> {
        let region_id = self.remote_region_id(&region);

        if self.scope.need_sync_resource(resource::ZONE) {
            if let Some(zones) = optional_listing(self.driver.list_zones(&region_id).await, resource::ZONE)? {
                let sync = ZoneSync::new(ctx.inventory.clone(), region.clone());
                let outcome = ctx.reconciler.reconcile(&sync, zones, self.options()).await?;
                self.result.merge(&outcome.result);
            }
        }

        if self.scope.need_sync_resource(resource::VPC) {
            if let Some(vpcs) = optional_listing(self.driver.list_vpcs(&region_id).await, resource::VPC)? {
                let mapping = ctx.mappings.get(&self.provider.id).await?;
                let sync = VpcSync::new(ctx.inventory.clone(), self.provider.clone(), region, mapping);
                let outcome = ctx.reconciler.reconcile(&sync, vpcs, self.options()).await?;
                self.result.merge(&outcome.result);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StagedTask for RegionSyncTask {
    async fn run_stage(&mut self, stage: TaskStage, ctx: &SyncContext) -> Result<StageOutcome> {
        match stage {
            TaskStage::Init => {
                let binding = ctx.state.mark_binding_syncing(&self.binding_id).await?;
                let region = ctx.inventory.regions.fetch_by_id(&binding.cloudregion_id).await?;
                debug!(binding_id = %self.binding_id, region_id = %region.id, "Region sync started");
                self.region = Some(region);
                Ok(StageOutcome::Next(TaskStage::ResourceSync))
            }
            TaskStage::ResourceSync => {
                let region = self
                    .region
                    .clone()
                    .ok_or_else(|| SyncError::not_found("cloudregion", &self.binding_id))?;
                self.sync_resources(ctx, region).await?;
                Ok(StageOutcome::Next(TaskStage::Completion))
            }
            TaskStage::Completion => {
                ctx.state.mark_binding_idle(&self.binding_id).await?;
                Ok(StageOutcome::Done(std::mem::take(&mut self.result)))
            }
            other => Err(SyncError::InvalidStateTransition {
                from: TaskStage::Init.to_string(),
                to: other.to_string(),
                reason: "region syncs have no such stage".to_string(),
            }),
        }
    }

    async fn on_failure(&mut self, stage: TaskStage, error: &SyncError, ctx: &SyncContext) {
        if owned_elsewhere(stage, error) {
            return;
        }
        if error.is_connectivity_failure() {
            health::mark_disconnected(ctx, &self.provider.id, &error.to_string()).await;
        }
        if let Err(e) = ctx.state.fail_binding(&self.binding_id, &error.to_string()).await {
            warn!(binding_id = %self.binding_id, error = %e, "Failed to reset binding after sync failure");
        }
    }
}
