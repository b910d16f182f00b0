//! Sync of one cloud account and fan-out to its providers.

use async_trait::async_trait;
use bridge_traits::cloud::CloudDriver;
use core_inventory::models::{Cloudprovider, Enableable};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::{
    health, join_children, optional_listing, owned_elsewhere, prepare, record_failure, spawn_child,
    ProviderSyncTask, StageOutcome, StagedTask, SyncContext,
};
use crate::error::{Result, SyncError};
use crate::job::{SyncTask, TaskId, TaskKind, TaskStage};
use crate::result::SyncResult;
use crate::scope::{resource, SyncScope};
use crate::synchronizer::{ExternalProjectSync, ReconcileOptions};

/// A provider that made it through region preparation.
struct Prepared {
    provider: Cloudprovider,
    driver: Arc<dyn CloudDriver>,
}

pub struct AccountSyncTask {
    account_id: String,
    task_id: TaskId,
    scope: SyncScope,
    /// Providers queued together with the account.
    provider_ids: Vec<String>,
    prepared: Vec<Prepared>,
    result: SyncResult,
    children: Vec<JoinHandle<Result<SyncTask>>>,
}

impl AccountSyncTask {
    pub fn new(record: &SyncTask, provider_ids: Vec<String>) -> Self {
        Self {
            account_id: record.entity_id.clone(),
            task_id: record.id,
            scope: record.scope.clone(),
            provider_ids,
            prepared: Vec::new(),
            result: SyncResult::new(),
            children: Vec::new(),
        }
    }

    /// Give up on one provider: it goes back to idle and leaves the fan-out.
    async fn drop_provider(&mut self, ctx: &SyncContext, provider_id: &str, error: &SyncError) {
        warn!(provider_id, error = %error, "Provider dropped from account sync");
        record_failure(&mut self.result, format!("cloudprovider {}: {}", provider_id, error));
        if error.is_connectivity_failure() {
            health::mark_disconnected(ctx, provider_id, &error.to_string()).await;
        }
        if let Err(e) = ctx.state.fail_provider(provider_id, &error.to_string()).await {
            warn!(provider_id, error = %e, "Failed to reset provider");
        }
    }

    #[instrument(skip_all, fields(account_id = %self.account_id))]
    async fn prepare_regions(&mut self, ctx: &SyncContext) -> Result<()> {
        let mut prepared = Vec::new();
        for provider_id in std::mem::take(&mut self.provider_ids) {
            match prepare_one(ctx, &provider_id, &self.scope).await {
                Ok((entry, result)) => {
                    self.result.merge(&result);
                    prepared.push(entry);
                }
                Err(e) => self.drop_provider(ctx, &provider_id, &e).await,
            }
        }
        info!(providers = prepared.len(), "Regions prepared");
        self.prepared = prepared;
        Ok(())
    }

    async fn sync_projects(&mut self, ctx: &SyncContext) -> Result<()> {
        if !self.scope.need_sync_resource(resource::PROJECT) {
            return Ok(());
        }

        let mut kept = Vec::new();
        for entry in std::mem::take(&mut self.prepared) {
            match sync_projects_of(ctx, &entry, &self.scope).await {
                Ok(result) => {
                    self.result.merge(&result);
                    kept.push(entry);
                }
                Err(e) if e.is_connectivity_failure() => {
                    self.drop_provider(ctx, &entry.provider.id, &e).await;
                }
                Err(e) => {
                    warn!(provider_id = %entry.provider.id, error = %e, "External project sync failed");
                    record_failure(&mut self.result, format!("cloudprovider {}: {}", entry.provider.id, e));
                    kept.push(entry);
                }
            }
        }
        self.prepared = kept;
        Ok(())
    }

    async fn fan_out(&mut self, ctx: &SyncContext) -> Result<()> {
        ctx.state.mark_account_syncing(&self.account_id).await?;

        for entry in &self.prepared {
            let record = SyncTask::new(
                TaskKind::Provider,
                &entry.provider.id,
                &entry.provider.name,
                self.scope.clone(),
                ctx.clock.now(),
            )
            .with_parent(self.task_id);
            let task = ProviderSyncTask::child(&record, Arc::clone(&entry.driver));
            let handle = spawn_child(task, record, ctx, None).await?;
            self.children.push(handle);
        }
        info!(account_id = %self.account_id, providers = self.children.len(), "Fanned out provider syncs");
        Ok(())
    }

    async fn complete(&mut self, ctx: &SyncContext) -> Result<StageOutcome> {
        join_children(std::mem::take(&mut self.children), &mut self.result).await;
        ctx.state.revert_pending_providers(&self.account_id).await?;
        ctx.state.mark_account_idle(&self.account_id).await?;
        Ok(StageOutcome::Done(std::mem::take(&mut self.result)))
    }
}

async fn prepare_one(
    ctx: &SyncContext,
    provider_id: &str,
    scope: &SyncScope,
) -> Result<(Prepared, SyncResult)> {
    let provider = ctx.inventory.provider(provider_id).await?;
    let driver = prepare::connect(ctx, &provider).await?;
    let result = prepare::prepare_regions(ctx, &provider, driver.as_ref(), scope).await?;
    let provider = ctx.inventory.provider(provider_id).await?;
    Ok((Prepared { provider, driver }, result))
}

async fn sync_projects_of(ctx: &SyncContext, entry: &Prepared, scope: &SyncScope) -> Result<SyncResult> {
    let Some(remotes) = optional_listing(entry.driver.list_projects().await, resource::PROJECT)? else {
        return Ok(SyncResult::new());
    };
    let mapping = ctx.mappings.get(&entry.provider.id).await?;
    let sync = ExternalProjectSync::new(ctx.inventory.clone(), entry.provider.clone(), mapping);
    let outcome = ctx
        .reconciler
        .reconcile(
            &sync,
            remotes,
            ReconcileOptions {
                allow_mass_delete: scope.full_sync,
            },
        )
        .await?;
    Ok(outcome.result)
}

#[async_trait]
impl StagedTask for AccountSyncTask {
    async fn run_stage(&mut self, stage: TaskStage, ctx: &SyncContext) -> Result<StageOutcome> {
        match stage {
            TaskStage::Init => {
                let account = ctx.state.mark_account_queued(&self.account_id).await?;
                if !account.is_enabled() {
                    return Err(SyncError::invalid_status(
                        TaskKind::Account.entity_type(),
                        &account.id,
                        "disabled",
                        "cannot sync a disabled entity",
                    ));
                }
                Ok(StageOutcome::Next(TaskStage::RegionPrepare))
            }
            TaskStage::RegionPrepare => {
                self.prepare_regions(ctx).await?;
                Ok(StageOutcome::Next(TaskStage::ResourceSync))
            }
            TaskStage::ResourceSync => {
                if !self.scope.need_sync_info() {
                    return Ok(StageOutcome::Next(TaskStage::Completion));
                }
                self.sync_projects(ctx).await?;
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
        if let Err(e) = ctx.state.fail_account(&self.account_id, &error.to_string()).await {
            warn!(account_id = %self.account_id, error = %e, "Failed to reset account after sync failure");
        }
    }
}
