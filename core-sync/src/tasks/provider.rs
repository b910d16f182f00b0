//! Sync of one cloud provider and fan-out to its region bindings.

use async_trait::async_trait;
use bridge_traits::cloud::CloudDriver;
use core_inventory::models::{Cloudprovider, CloudproviderRegion, Enableable, SyncStatus, Syncable};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    health, join_children, optional_listing, owned_elsewhere, prepare, spawn_child, RegionSyncTask,
    StageOutcome, StagedTask, SyncContext,
};
use crate::error::{Result, SyncError};
use crate::job::{SyncTask, TaskId, TaskKind, TaskStage};
use crate::result::SyncResult;
use crate::scope::{resource, SyncScope};
use crate::synchronizer::{InterVpcNetworkSync, ReconcileOptions};

pub struct ProviderSyncTask {
    provider_id: String,
    task_id: TaskId,
    scope: SyncScope,
    /// Triggered on its own rather than spawned by an account sync.
    standalone: bool,
    provider: Option<Cloudprovider>,
    driver: Option<Arc<dyn CloudDriver>>,
    result: SyncResult,
    children: Vec<JoinHandle<Result<SyncTask>>>,
}

impl ProviderSyncTask {
    /// A provider sync triggered directly; it prepares its own regions.
    pub fn standalone(record: &SyncTask) -> Self {
        Self::new(record, true, None)
    }

    /// A provider sync spawned by an account sync that already prepared
    /// regions and connected the driver.
    pub fn child(record: &SyncTask, driver: Arc<dyn CloudDriver>) -> Self {
        Self::new(record, false, Some(driver))
    }

    fn new(record: &SyncTask, standalone: bool, driver: Option<Arc<dyn CloudDriver>>) -> Self {
        Self {
            provider_id: record.entity_id.clone(),
            task_id: record.id,
            scope: record.scope.clone(),
            standalone,
            provider: None,
            driver,
            result: SyncResult::new(),
            children: Vec::new(),
        }
    }

    fn loaded(&self) -> Result<(Cloudprovider, Arc<dyn CloudDriver>)> {
        match (&self.provider, &self.driver) {
            (Some(provider), Some(driver)) => Ok((provider.clone(), Arc::clone(driver))),
            _ => Err(SyncError::not_found(TaskKind::Provider.entity_type(), &self.provider_id)),
        }
    }

    async fn init(&mut self, ctx: &SyncContext) -> Result<StageOutcome> {
        let provider = ctx.state.mark_provider_queued(&self.provider_id).await?;
        let account = ctx.inventory.account(&provider.cloudaccount_id).await?;
        if !account.is_enabled() {
            return Err(SyncError::invalid_status(
                TaskKind::Account.entity_type(),
                &account.id,
                "disabled",
                "account of the provider is disabled",
            ));
        }

        if self.driver.is_none() {
            self.driver = Some(prepare::connect(ctx, &provider).await?);
        }
        self.provider = Some(provider);

        Ok(StageOutcome::Next(if self.standalone {
            TaskStage::RegionPrepare
        } else {
            TaskStage::ResourceSync
        }))
    }

    async fn sync_inter_vpc_networks(&mut self, ctx: &SyncContext) -> Result<()> {
        if !self.scope.need_sync_resource(resource::INTER_VPC_NETWORK) {
            return Ok(());
        }
        let (provider, driver) = self.loaded()?;
        let Some(remotes) = optional_listing(
            driver.list_inter_vpc_networks().await,
            resource::INTER_VPC_NETWORK,
        )?
        else {
            return Ok(());
        };

        let mapping = ctx.mappings.get(&provider.id).await?;
        let sync = InterVpcNetworkSync::load(ctx.inventory.clone(), provider, mapping).await?;
        let outcome = ctx
            .reconciler
            .reconcile(
                &sync,
                remotes,
                ReconcileOptions {
                    allow_mass_delete: self.scope.full_sync,
                },
            )
            .await?;
        self.result.merge(&outcome.result);
        Ok(())
    }

    /// Bindings to sync in this pass, queued. Pending bindings outside the
    /// scope go back to idle.
    async fn select_bindings(&self, ctx: &SyncContext) -> Result<Vec<CloudproviderRegion>> {
        let mut selected = Vec::new();
        for binding in ctx.inventory.bindings_of_provider(&self.provider_id).await? {
            if !binding.is_enabled() || !self.scope.includes_region(&binding.cloudregion_id) {
                if binding.sync_status().is_pending() {
                    ctx.state.revert_pending_binding(&binding.id).await?;
                }
                continue;
            }

            let binding_id = binding.id.clone();
            let queued = match binding.sync_status() {
                SyncStatus::Queuing | SyncStatus::Queued => Ok(binding),
                SyncStatus::Idle => ctx.state.mark_binding_queuing(&binding_id, false).await,
                SyncStatus::Syncing if ctx.state.can_sync(&binding) => {
                    ctx.state.mark_binding_queuing(&binding_id, true).await
                }
                SyncStatus::Syncing => {
                    debug!(%binding_id, "Binding busy with another sync; skipping");
                    continue;
                }
            };
            match queued {
                Ok(binding) => selected.push(binding),
                Err(e) => warn!(%binding_id, error = %e, "Binding left out of sync"),
            }
        }
        Ok(selected)
    }

    async fn fan_out(&mut self, ctx: &SyncContext) -> Result<()> {
        ctx.state.mark_provider_syncing(&self.provider_id).await?;
        let (provider, driver) = self.loaded()?;

        let bindings = self.select_bindings(ctx).await?;
        info!(provider_id = %self.provider_id, regions = bindings.len(), "Fanning out region syncs");
        for binding in bindings {
            let record = SyncTask::new(
                TaskKind::Region,
                &binding.id,
                &binding.name,
                self.scope.clone(),
                ctx.clock.now(),
            )
            .with_parent(self.task_id);
            let task = RegionSyncTask::new(&binding.id, provider.clone(), Arc::clone(&driver), self.scope.clone());
            let handle = spawn_child(task, record, ctx, Some(Arc::clone(&ctx.region_slots))).await?;
            self.children.push(handle);
        }
        Ok(())
    }

    async fn complete(&mut self, ctx: &SyncContext) -> Result<StageOutcome> {
        join_children(std::mem::take(&mut self.children), &mut self.result).await;
        ctx.state.revert_pending_bindings(&self.provider_id).await?;
        ctx.state.mark_provider_idle(&self.provider_id).await?;
        Ok(StageOutcome::Done(std::mem::take(&mut self.result)))
    }
}

#[async_trait]
impl StagedTask for ProviderSyncTask {
    async fn run_stage(&mut self, stage: TaskStage, ctx: &SyncContext) -> Result<StageOutcome> {
        match stage {
            TaskStage::Init => self.init(ctx).await,
            TaskStage::RegionPrepare => {
                let (provider, driver) = self.loaded()?;
                let prepared = prepare::prepare_regions(ctx, &provider, driver.as_ref(), &self.scope).await?;
                self.result.merge(&prepared);
                self.provider = Some(ctx.inventory.provider(&self.provider_id).await?);
                Ok(StageOutcome::Next(TaskStage::ResourceSync))
            }
            TaskStage::ResourceSync => {
                if !self.scope.need_sync_info() {
                    return Ok(StageOutcome::Next(TaskStage::Completion));
                }
                self.sync_inter_vpc_networks(ctx).await?;
                Ok(StageOutcome::Next(TaskStage::Fanout))
            }
            TaskStage::Fanout => {
                self.fan_out(ctx).await?;
                Ok(StageOutcome::Next(TaskStage::Completion))
            }
            TaskStage::Completion => self.complete(ctx).await,
        }
    }

    async fn on_failure(&mut self, stage: TaskStage, error: &SyncError, ctx: &SyncContext) {
        if owned_elsewhere(stage, error) {
            return;
        }
        if error.is_connectivity_failure() {
            health::mark_disconnected(ctx, &self.provider_id, &error.to_string()).await;
        }
        if let Err(e) = ctx.state.fail_provider(&self.provider_id, &error.to_string()).await {
            warn!(provider_id = %self.provider_id, error = %e, "Failed to reset provider after sync failure");
        }
    }
}
