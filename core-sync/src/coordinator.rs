//! # Sync Coordinator
//!
//! Entry point for triggering, observing and cancelling syncs.
//!
//! ## Overview
//!
//! The `SyncCoordinator` owns the shared [`SyncContext`] and schedules staged
//! tasks on the tokio runtime:
//! - Admission control through the [`SyncStateMachine`]
//! - Scope normalization through the [`ScopeResolver`]
//! - Propagation of `queuing` to the children in scope
//! - A bounded worker pool for account and provider tasks
//! - Cancellation of syncs that are still queuing
//!
//! ## Workflow
//!
//! 1. Apply request defaults to the scope and admit the entity. A task of
//!    the same account still running in this process refuses the trigger,
//!    even a forced one
//! 2. Resolve scope identifiers to canonical ids
//! 3. Mark the entity and its in-scope children `queuing`
//! 4. Store a pending task record and publish `Queued`
//! 5. Spawn the task; it waits for a worker slot, then runs its stages
//!
//! ## Usage
//!
//! ```rust,ignore
//! let coordinator = SyncCoordinator::new(&config, inventory, events);
//! coordinator.register_driver_factory(Arc::new(AliyunFactory::new())).await;
//!
//! let handle = coordinator.trigger_account_sync(&account.id, None).await?;
//! let task = handle.wait().await?;
//! println!("{}: {:?}", task.status, task.result);
//! ```

use bridge_traits::audit::{AuditAction, AuditEntry};
use bridge_traits::cloud::CloudDriverFactory;
use bridge_traits::persistence::Record;
use core_inventory::models::{Cloudaccount, Cloudprovider, CloudproviderRegion, SyncStatus, Syncable};
use core_inventory::Inventory;
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::driver::DriverRegistry;
use crate::error::{Result, SyncError};
use crate::job::{SyncTask, TaskId, TaskKind};
use crate::project_mapping::ProjectMappingCache;
use crate::repository::{InMemoryTaskRepository, TaskRepository};
use crate::scope::{ScopeResolver, SyncScope};
use crate::state::SyncStateMachine;
use crate::synchronizer::Reconciler;
use crate::tasks::{
    abandon, drive, enqueue, finish_cancelled, release, AccountSyncTask, ProviderSyncTask, StagedTask,
    SyncContext,
};

/// Scheduled top-level sync of one entity.
#[derive(Clone)]
struct ActiveSync {
    task_id: TaskId,
    /// Account the task runs under.
    account_id: String,
    token: CancellationToken,
}

/// Handle to a scheduled sync task.
pub struct TaskHandle {
    task_id: TaskId,
    handle: JoinHandle<Result<SyncTask>>,
}

impl TaskHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Wait for the task and every sub-task it spawned to finish.
    pub async fn wait(self) -> Result<SyncTask> {
        self.handle
            .await
            .map_err(|e| SyncError::Internal(format!("sync task {} aborted: {}", self.task_id, e)))?
    }
}

pub struct SyncCoordinator {
    ctx: SyncContext,
    scopes: ScopeResolver,
    /// Worker slots for account and provider tasks.
    workers: Arc<Semaphore>,
    /// Scheduled syncs by entity id. Also serializes triggers.
    active: Arc<Mutex<HashMap<String, ActiveSync>>>,
}

impl SyncCoordinator {
    /// Create a coordinator over `inventory` with an in-memory task repository.
    pub fn new(config: &CoreConfig, inventory: Inventory, events: EventBus) -> Self {
        Self::with_task_repository(config, inventory, events, Arc::new(InMemoryTaskRepository::new()))
    }

    pub fn with_task_repository(
        config: &CoreConfig,
        inventory: Inventory,
        events: EventBus,
        tasks: Arc<dyn TaskRepository>,
    ) -> Self {
        let settings = config.sync.clone();
        let state = Arc::new(SyncStateMachine::new(
            inventory.clone(),
            Arc::clone(&config.lock_service),
            Arc::clone(&config.clock),
            settings.stale_sync_timeout(),
        ));
        let reconciler = Reconciler::new(
            Arc::clone(&config.lock_service),
            Arc::clone(&config.audit_sink),
            events.clone(),
            Arc::clone(&config.clock),
        );

        let ctx = SyncContext {
            state,
            reconciler,
            drivers: Arc::new(DriverRegistry::new(Arc::clone(&config.credential_vault))),
            mappings: Arc::new(ProjectMappingCache::new(inventory.clone())),
            tasks,
            audit: Arc::clone(&config.audit_sink),
            events,
            clock: Arc::clone(&config.clock),
            locks: Arc::clone(&config.lock_service),
            region_slots: Arc::new(Semaphore::new(settings.max_concurrent_region_syncs)),
            inventory: inventory.clone(),
            settings: settings.clone(),
        };

        Self {
            ctx,
            scopes: ScopeResolver::new(inventory),
            workers: Arc::new(Semaphore::new(settings.max_concurrent_syncs)),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register the driver factory of one vendor.
    pub async fn register_driver_factory(&self, factory: Arc<dyn CloudDriverFactory>) {
        self.ctx.drivers.register(factory).await;
    }

    /// Drop cached project mappings after a mapping rule was changed or rebound.
    pub async fn invalidate_project_mappings(&self) {
        self.ctx.mappings.invalidate().await;
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn inventory(&self) -> &Inventory {
        &self.ctx.inventory
    }

    // =========================================================================
    // Triggering
    // =========================================================================

    /// Sync an account, its enabled providers and their regions in scope.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the account or a scope identifier doesn't exist
    /// - `InvalidStatus` if the account is disabled, busy and `force` is off,
    ///   or a task of the account is still running here
    #[instrument(skip(self, scope))]
    pub async fn trigger_account_sync(
        &self,
        account_id: &str,
        scope: Option<SyncScope>,
    ) -> Result<TaskHandle> {
        let mut scope = SyncScope::for_request(scope);
        let mut active = self.active.lock().await;

        let account = self.ctx.state.admit_account(account_id, scope.force).await?;
        refuse_live(&active, Cloudaccount::KEYWORD, &account.id, &account.id)?;
        self.scopes.normalize(&mut scope).await?;
        let providers = self.ctx.state.mark_account_queuing(&account.id, &scope).await?;

        let record = SyncTask::new(
            TaskKind::Account,
            &account.id,
            &account.name,
            scope,
            self.ctx.clock.now(),
        );
        let task = AccountSyncTask::new(&record, providers);
        self.schedule(&mut active, &account.id, task, record).await
    }

    /// Sync one provider and its regions in scope.
    ///
    /// The owning account is held in `syncing` until the provider finishes,
    /// so no account sync can start underneath it.
    #[instrument(skip(self, scope))]
    pub async fn trigger_provider_sync(
        &self,
        provider_id: &str,
        scope: Option<SyncScope>,
    ) -> Result<TaskHandle> {
        let mut scope = SyncScope::for_request(scope);
        let mut active = self.active.lock().await;

        let provider = self.ctx.state.admit_provider(provider_id, scope.force).await?;
        refuse_live(&active, Cloudprovider::KEYWORD, &provider.id, &provider.cloudaccount_id)?;
        self.scopes.normalize(&mut scope).await?;
        self.ctx.state.mark_provider_queuing(&provider.id, &scope).await?;
        if let Err(e) = self
            .ctx
            .state
            .hold_account(&provider.cloudaccount_id, scope.force)
            .await
        {
            if let Err(revert) = self.ctx.state.cancel_provider_starting_sync(&provider.id, None).await {
                warn!(provider_id, error = %revert, "Failed to revert provider after trigger failure");
            }
            return Err(e);
        }

        let record = SyncTask::new(
            TaskKind::Provider,
            &provider.id,
            &provider.name,
            scope,
            self.ctx.clock.now(),
        );
        let task = ProviderSyncTask::standalone(&record);
        self.schedule(&mut active, &provider.cloudaccount_id, task, record).await
    }

    async fn schedule<T: StagedTask>(
        &self,
        active: &mut HashMap<String, ActiveSync>,
        account_id: &str,
        mut task: T,
        record: SyncTask,
    ) -> Result<TaskHandle> {
        if let Err(e) = enqueue(&record, &self.ctx).await {
            warn!(task_id = %record.id, error = %e, "Failed to store sync task");
            return Err(release(&mut task, e, &self.ctx).await);
        }
        self.ctx
            .audit(
                AuditEntry::new(
                    record.kind.entity_type(),
                    &record.entity_id,
                    &record.entity_name,
                    AuditAction::Syncing,
                )
                .with_notes(json!({
                    "task_id": record.id.to_string(),
                    "scope": &record.scope,
                })),
            )
            .await;

        let task_id = record.id;
        let entity_id = record.entity_id.clone();
        let token = CancellationToken::new();
        active.insert(
            entity_id.clone(),
            ActiveSync {
                task_id,
                account_id: account_id.to_string(),
                token: token.clone(),
            },
        );

        let ctx = self.ctx.clone();
        let workers = Arc::clone(&self.workers);
        let registry = Arc::clone(&self.active);
        let span = tracing::info_span!("sync_task", task_id = %task_id, kind = %record.kind);
        let handle = tokio::spawn(
            async move {
                let outcome = run_scheduled(task, record, ctx, workers, token).await;

                let mut active = registry.lock().await;
                if active.get(&entity_id).is_some_and(|a| a.task_id == task_id) {
                    active.remove(&entity_id);
                }
                outcome
            }
            .instrument(span),
        );

        info!(%task_id, "Sync scheduled");
        Ok(TaskHandle { task_id, handle })
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancel an account sync that has not started yet.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` once the sync left `queuing`.
    #[instrument(skip(self))]
    pub async fn cancel_account_sync(&self, account_id: &str) -> Result<()> {
        let token = self.active_token(account_id).await;
        self.ctx
            .state
            .cancel_account_starting_sync(account_id, token.as_ref())
            .await?;
        if token.is_none() {
            let account = self.ctx.inventory.account(account_id).await?;
            self.audit_orphan_cancel(Cloudaccount::KEYWORD, &account.id, &account.name)
                .await;
        }
        Ok(())
    }

    /// Cancel a provider sync that has not started yet.
    #[instrument(skip(self))]
    pub async fn cancel_provider_sync(&self, provider_id: &str) -> Result<()> {
        let token = self.active_token(provider_id).await;
        self.ctx
            .state
            .cancel_provider_starting_sync(provider_id, token.as_ref())
            .await?;
        if token.is_none() {
            let provider = self.ctx.inventory.provider(provider_id).await?;
            self.audit_orphan_cancel(Cloudprovider::KEYWORD, &provider.id, &provider.name)
                .await;
        }
        Ok(())
    }

    async fn active_token(&self, entity_id: &str) -> Option<CancellationToken> {
        self.active
            .lock()
            .await
            .get(entity_id)
            .map(|active| active.token.clone())
    }

    /// Audit a cancel that found no scheduled task, e.g. after a restart.
    async fn audit_orphan_cancel(&self, entity_type: &str, id: &str, name: &str) {
        debug!(entity_type, id, "Cancelled a queuing sync with no scheduled task");
        self.ctx
            .audit(AuditEntry::new(entity_type, id, name, AuditAction::SyncCancel))
            .await;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn account_sync_status(&self, account_id: &str) -> Result<SyncStatus> {
        Ok(self.ctx.inventory.account(account_id).await?.sync_status())
    }

    pub async fn provider_sync_status(&self, provider_id: &str) -> Result<SyncStatus> {
        Ok(self.ctx.inventory.provider(provider_id).await?.sync_status())
    }

    /// Task record with its result summary.
    pub async fn task(&self, task_id: &TaskId) -> Result<SyncTask> {
        self.ctx
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| SyncError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Sub-tasks spawned by `task_id`, oldest first.
    pub async fn child_tasks(&self, task_id: &TaskId) -> Result<Vec<SyncTask>> {
        self.ctx.tasks.list_children(task_id).await
    }

    /// Pending or running task of an entity.
    pub async fn active_task(&self, entity_id: &str) -> Result<Option<SyncTask>> {
        self.ctx.tasks.find_active_by_entity(entity_id).await
    }

    pub async fn task_history(&self, entity_id: &str) -> Result<Vec<SyncTask>> {
        self.ctx.tasks.find_by_entity(entity_id).await
    }

    // =========================================================================
    // Region switches
    // =========================================================================

    /// Turn syncing of a provider's regions on or off.
    #[instrument(skip(self, region_ids))]
    pub async fn set_provider_regions_enabled(
        &self,
        provider_id: &str,
        region_ids: &[String],
        enabled: bool,
    ) -> Result<Vec<CloudproviderRegion>> {
        let changed = self
            .ctx
            .state
            .set_bindings_enabled(provider_id, region_ids, enabled)
            .await?;

        let action = if enabled {
            AuditAction::Enable
        } else {
            AuditAction::Disable
        };
        for binding in &changed {
            self.ctx
                .audit(AuditEntry::new(
                    CloudproviderRegion::KEYWORD,
                    &binding.id,
                    &binding.name,
                    action,
                ))
                .await;
        }
        info!(changed = changed.len(), enabled, "Provider regions switched");
        Ok(changed)
    }
}

/// Refuse a trigger while a task of `account_id` is still running here.
/// `force` does not override this.
fn refuse_live(
    active: &HashMap<String, ActiveSync>,
    entity_type: &str,
    entity_id: &str,
    account_id: &str,
) -> Result<()> {
    match active.values().find(|a| a.account_id == account_id) {
        Some(live) => Err(SyncError::invalid_status(
            entity_type,
            entity_id,
            "running",
            format!("task {} of the same account is still running", live.task_id),
        )),
        None => Ok(()),
    }
}

/// Wait for a worker slot unless cancelled first, then run the task.
async fn run_scheduled<T: StagedTask>(
    task: T,
    record: SyncTask,
    ctx: SyncContext,
    workers: Arc<Semaphore>,
    token: CancellationToken,
) -> Result<SyncTask> {
    let _permit = tokio::select! {
        permit = workers.acquire_owned() => match permit {
            Ok(permit) => Some(permit),
            Err(e) => return abandon(task, record, SyncError::Internal(e.to_string()), &ctx).await,
        },
        _ = token.cancelled() => None,
    };

    if token.is_cancelled() {
        return finish_cancelled(record, &ctx).await;
    }
    drive(task, record, ctx).await
}
