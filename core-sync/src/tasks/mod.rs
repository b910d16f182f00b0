//! # Staged Sync Tasks
//!
//! Typed stage machines for account, provider and region syncs, and the
//! single loop that drives them.
//!
//! ## Overview
//!
//! A [`StagedTask`] handles one [`TaskStage`] at a time and says which stage
//! comes next. [`drive`] owns everything around the stages:
//!
//! 1. Moves the task record to `running` and publishes `Started`
//! 2. Calls the stage handler, recording and publishing each stage change
//! 3. Bounds the whole loop by the optional task timeout
//! 4. Routes any stage error to [`StagedTask::on_failure`], which puts the
//!    entity back to idle. A task that cannot even start, or never gets a
//!    worker slot, goes through the same handler via [`abandon`]
//! 5. Finalizes the task record, the audit trail and the completion event
//!
//! A task that finds its entity already idle during `Init` was cancelled
//! while queuing and ends as `cancelled` without touching the entity.
//!
//! ## Fan-out
//!
//! Account syncs spawn provider tasks; provider syncs spawn region tasks
//! bounded by the region semaphore. Parents wait for all children in
//! `Completion` before leaving `syncing`.

mod account;
mod health;
mod prepare;
mod provider;
mod region;

pub use account::AccountSyncTask;
pub use provider::ProviderSyncTask;
pub use region::RegionSyncTask;

use async_trait::async_trait;
use bridge_traits::audit::{AuditAction, AuditEntry, AuditSink};
use bridge_traits::{Clock, LockService};
use core_inventory::Inventory;
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::driver::DriverRegistry;
use crate::error::{Result, SyncError};
use crate::job::{SyncTask, TaskStage};
use crate::project_mapping::ProjectMappingCache;
use crate::repository::TaskRepository;
use crate::result::SyncResult;
use crate::state::SyncStateMachine;
use crate::synchronizer::Reconciler;

/// Shared collaborators handed to every task.
#[derive(Clone)]
pub struct SyncContext {
    pub inventory: Inventory,
    pub state: Arc<SyncStateMachine>,
    pub reconciler: Reconciler,
    pub drivers: Arc<DriverRegistry>,
    pub mappings: Arc<ProjectMappingCache>,
    pub tasks: Arc<dyn TaskRepository>,
    pub audit: Arc<dyn AuditSink>,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<dyn LockService>,
    /// Bounds concurrently running region tasks.
    pub region_slots: Arc<Semaphore>,
    pub settings: SyncSettings,
}

impl SyncContext {
    /// Best-effort audit write.
    pub(crate) async fn audit(&self, entry: AuditEntry) {
        let entry = entry.with_timestamp(self.clock.now());
        if let Err(e) = self.audit.log_event(entry).await {
            warn!(error = %e, "Failed to write audit entry");
        }
    }

    fn emit(&self, event: SyncEvent) {
        self.events.emit(CoreEvent::Sync(event)).ok();
    }
}

/// What a stage handler asks the driver loop to do next.
#[derive(Debug)]
pub enum StageOutcome {
    Next(TaskStage),
    Done(SyncResult),
}

#[async_trait]
pub trait StagedTask: Send + 'static {
    async fn run_stage(&mut self, stage: TaskStage, ctx: &SyncContext) -> Result<StageOutcome>;

    /// Drive the entity back to idle after `error` aborted `stage`.
    async fn on_failure(&mut self, stage: TaskStage, error: &SyncError, ctx: &SyncContext);
}

/// Run `task` to its end and return the final task record.
pub async fn drive<T: StagedTask>(mut task: T, record: SyncTask, ctx: SyncContext) -> Result<SyncTask> {
    let pending = record.clone();
    let mut record = match start(record, &ctx).await {
        Ok(record) => record,
        Err(e) => return abandon(task, pending, e, &ctx).await,
    };
    ctx.emit(SyncEvent::Started {
        task_id: record.id.to_string(),
        entity_type: record.kind.entity_type().to_string(),
        entity_id: record.entity_id.clone(),
    });
    info!(task_id = %record.id, kind = %record.kind, entity_id = %record.entity_id, "Sync task started");

    let outcome = match ctx.settings.sync_timeout() {
        Some(limit) => {
            match tokio::time::timeout(limit, run_stages(&mut task, &mut record, &ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SyncError::Timeout(limit.as_secs())),
            }
        }
        None => run_stages(&mut task, &mut record, &ctx).await,
    };

    let record = match outcome {
        Ok(result) => finish_completed(record, result, &ctx).await?,
        Err(SyncError::Cancelled) if record.stage == TaskStage::Init => {
            finish_cancelled(record, &ctx).await?
        }
        Err(e) => {
            let stage = record.stage;
            error!(task_id = %record.id, %stage, error = %e, "Sync task failed");
            task.on_failure(stage, &e, &ctx).await;
            finish_failed(record, &e, &ctx).await?
        }
    };
    Ok(record)
}

async fn start(record: SyncTask, ctx: &SyncContext) -> Result<SyncTask> {
    let record = record.start(ctx.clock.now())?;
    ctx.tasks.update(&record).await?;
    Ok(record)
}

/// Fail a task that never ran a stage. The failure handler still puts the
/// entity back to idle.
pub(crate) async fn abandon<T: StagedTask>(
    mut task: T,
    record: SyncTask,
    error: SyncError,
    ctx: &SyncContext,
) -> Result<SyncTask> {
    error!(task_id = %record.id, error = %error, "Sync task could not start");
    let error = release(&mut task, error, ctx).await;
    finish_failed(record, &error, ctx).await
}

/// Put the entity of a task that never ran back to idle. Returns the error
/// the failure handler saw.
pub(crate) async fn release<T: StagedTask>(task: &mut T, error: SyncError, ctx: &SyncContext) -> SyncError {
    // Not a conflict with another sync, whatever the cause says.
    let error = match error {
        SyncError::InvalidStateTransition { .. } => SyncError::Internal(error.to_string()),
        other => other,
    };
    task.on_failure(TaskStage::Init, &error, ctx).await;
    error
}

async fn run_stages<T: StagedTask>(
    task: &mut T,
    record: &mut SyncTask,
    ctx: &SyncContext,
) -> Result<SyncResult> {
    let mut stage = TaskStage::Init;
    loop {
        if stage != record.stage {
            record.enter_stage(stage)?;
            ctx.tasks.update(record).await?;
        }
        ctx.emit(SyncEvent::StageChanged {
            task_id: record.id.to_string(),
            stage: stage.to_string(),
        });
        debug!(task_id = %record.id, %stage, "Entering stage");

        match task.run_stage(stage, ctx).await? {
            StageOutcome::Next(next) => stage = next,
            StageOutcome::Done(result) => return Ok(result),
        }
    }
}

async fn finish_completed(record: SyncTask, result: SyncResult, ctx: &SyncContext) -> Result<SyncTask> {
    let record = record.complete(result.clone(), ctx.clock.now())?;
    ctx.tasks.update(&record).await?;

    let entity_type = record.kind.entity_type();
    let mut entry = AuditEntry::new(entity_type, &record.entity_id, &record.entity_name, AuditAction::SyncComplete)
        .with_notes(json!({
            "task_id": record.id.to_string(),
            "summary": result.to_string(),
            "result": result,
        }));
    if result.is_error() {
        entry = entry.failed();
    }
    ctx.audit(entry).await;
    ctx.emit(SyncEvent::Completed {
        task_id: record.id.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: record.entity_id.clone(),
        added: result.added,
        updated: result.updated,
        deleted: result.deleted,
        errors: result.error_count(),
        duration_ms: record.duration_ms().unwrap_or(0),
    });
    info!(task_id = %record.id, status = %record.status, %result, "Sync task finished");
    Ok(record)
}

async fn finish_failed(record: SyncTask, err: &SyncError, ctx: &SyncContext) -> Result<SyncTask> {
    let record = record.fail(err.to_string(), ctx.clock.now())?;
    ctx.tasks.update(&record).await?;

    let entity_type = record.kind.entity_type();
    let stage = record.failed_stage.unwrap_or(record.stage);
    ctx.audit(
        AuditEntry::new(entity_type, &record.entity_id, &record.entity_name, AuditAction::SyncFailed)
            .with_notes(json!({
                "task_id": record.id.to_string(),
                "stage": stage.as_str(),
                "error": err.to_string(),
            }))
            .failed(),
    )
    .await;
    ctx.emit(SyncEvent::Failed {
        task_id: record.id.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: record.entity_id.clone(),
        stage: stage.to_string(),
        message: err.to_string(),
    });
    Ok(record)
}

/// Finalize a task whose sync was cancelled while it was still queuing.
pub(crate) async fn finish_cancelled(record: SyncTask, ctx: &SyncContext) -> Result<SyncTask> {
    let record = record.cancel(ctx.clock.now())?;
    ctx.tasks.update(&record).await?;

    let entity_type = record.kind.entity_type();
    ctx.audit(
        AuditEntry::new(entity_type, &record.entity_id, &record.entity_name, AuditAction::SyncCancel)
            .with_notes(json!({ "task_id": record.id.to_string() })),
    )
    .await;
    ctx.emit(SyncEvent::Cancelled {
        task_id: record.id.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: record.entity_id.clone(),
    });
    info!(task_id = %record.id, "Sync task cancelled");
    Ok(record)
}

/// Store a pending task record and publish `Queued`.
pub(crate) async fn enqueue(record: &SyncTask, ctx: &SyncContext) -> Result<()> {
    ctx.tasks.insert(record).await?;
    ctx.emit(SyncEvent::Queued {
        task_id: record.id.to_string(),
        entity_type: record.kind.entity_type().to_string(),
        entity_id: record.entity_id.clone(),
    });
    Ok(())
}

/// Spawn a child task, optionally waiting for a slot of `slots` first.
pub(crate) async fn spawn_child<T: StagedTask>(
    task: T,
    record: SyncTask,
    ctx: &SyncContext,
    slots: Option<Arc<Semaphore>>,
) -> Result<JoinHandle<Result<SyncTask>>> {
    enqueue(&record, ctx).await?;

    let ctx = ctx.clone();
    let span = tracing::info_span!("sync_task", task_id = %record.id, kind = %record.kind);
    Ok(tokio::spawn(
        async move {
            let _permit = match slots {
                Some(slots) => match slots.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(e) => return abandon(task, record, SyncError::Internal(e.to_string()), &ctx).await,
                },
                None => None,
            };
            drive(task, record, ctx).await
        }
        .instrument(span),
    ))
}

/// Wait for every child and fold their results into `total`.
///
/// A child that failed counts as a pass-level error of the parent, which
/// then finishes partially completed.
pub(crate) async fn join_children(children: Vec<JoinHandle<Result<SyncTask>>>, total: &mut SyncResult) {
    for joined in join_all(children).await {
        match joined {
            Ok(Ok(child)) => {
                if let Some(result) = &child.result {
                    total.merge(result);
                }
                if let Some(message) = &child.error_message {
                    record_failure(total, format!("{} {}: {}", child.kind, child.entity_name, message));
                }
            }
            Ok(Err(e)) => record_failure(total, format!("child task: {}", e)),
            Err(e) => record_failure(total, format!("child task panicked: {}", e)),
        }
    }
}

/// Keep `message` and flag the aggregate as failed.
pub(crate) fn record_failure(total: &mut SyncResult, message: String) {
    if total.error.is_none() {
        total.set_error(message.clone());
    }
    total.messages.push(message);
}

/// `Init` found the entity in the middle of another sync; that sync owns it.
pub(crate) fn owned_elsewhere(stage: TaskStage, error: &SyncError) -> bool {
    stage == TaskStage::Init && matches!(error, SyncError::InvalidStateTransition { .. })
}

/// Run a listing call; an absent resource type yields `None`.
pub(crate) fn optional_listing<T>(listed: bridge_traits::error::Result<T>, what: &str) -> Result<Option<T>> {
    match listed {
        Ok(items) => Ok(Some(items)),
        Err(e) => {
            let err = SyncError::from(e);
            if err.is_absent_capability() {
                debug!(resource = what, error = %err, "Resource type not supported by provider; skipping");
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}
