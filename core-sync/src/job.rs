//! # Sync Task Records
//!
//! Persistent record of one staged sync task.
//!
//! ## Overview
//!
//! Every account, provider and region sync runs as a task. The record
//! tracks which stage the task is in, the aggregated result, and how it
//! ended. Child tasks (provider syncs spawned by an account sync, region
//! syncs spawned by a provider sync) point at their parent.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Completed | PartiallyCompleted
//!     ↓         ↓
//!     └──────→ Failed
//!     └──────→ Cancelled
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let task = SyncTask::new(TaskKind::Provider, &provider.id, &provider.name, scope);
//! let mut task = task.start(clock.now())?;
//! task.enter_stage(TaskStage::RegionPrepare)?;
//! let task = task.complete(result, clock.now())?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::result::SyncResult;
use crate::scope::SyncScope;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a task id from its string form
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidInput {
                field: "task_id".to_string(),
                message: e.to_string(),
            })
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Entity a task synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Account,
    Provider,
    Region,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Account => "account",
            TaskKind::Provider => "provider",
            TaskKind::Region => "region",
        }
    }

    /// Record keyword of the synchronized entity.
    pub fn entity_type(&self) -> &'static str {
        match self {
            TaskKind::Account => "cloudaccount",
            TaskKind::Provider => "cloudprovider",
            TaskKind::Region => "cloudproviderregion",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    /// Finished, but some items failed to reconcile.
    PartiallyCompleted,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::PartiallyCompleted
                | TaskStatus::Failed
                | TaskStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::PartiallyCompleted => "partially_completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "partially_completed" => Ok(TaskStatus::PartiallyCompleted),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(SyncError::InvalidInput {
                field: "task_status".to_string(),
                message: format!("unknown status {}", s),
            }),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages a task moves through, in order. Kinds skip the stages they do
/// not need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    Init,
    RegionPrepare,
    ResourceSync,
    Fanout,
    Completion,
}

impl TaskStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStage::Init => "init",
            TaskStage::RegionPrepare => "region_prepare",
            TaskStage::ResourceSync => "resource_sync",
            TaskStage::Fanout => "fanout",
            TaskStage::Completion => "completion",
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Sync Task Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub entity_id: String,
    pub entity_name: String,
    pub parent_id: Option<TaskId>,
    pub scope: SyncScope,
    pub status: TaskStatus,
    pub stage: TaskStage,
    /// Aggregated counters, set once the task finishes.
    pub result: Option<SyncResult>,
    pub error_message: Option<String>,
    /// Stage the task failed in.
    pub failed_stage: Option<TaskStage>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncTask {
    pub fn new(
        kind: TaskKind,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        scope: SyncScope,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            parent_id: None,
            scope,
            status: TaskStatus::Pending,
            stage: TaskStage::Init,
            result: None,
            error_message: None,
            failed_stage: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn start(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        Ok(self)
    }

    /// Move to `stage`. Stages never go backwards.
    pub fn enter_stage(&mut self, stage: TaskStage) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: stage.as_str().to_string(),
                reason: "Task must be running to change stage".to_string(),
            });
        }
        if stage < self.stage {
            return Err(SyncError::InvalidStateTransition {
                from: self.stage.as_str().to_string(),
                to: stage.as_str().to_string(),
                reason: "Stages only move forward".to_string(),
            });
        }
        self.stage = stage;
        Ok(())
    }

    /// Finish with `result`; item-level errors make the task partially completed.
    pub fn complete(mut self, result: SyncResult, now: DateTime<Utc>) -> Result<Self> {
        let status = if result.error_count() > 0 || result.is_error() {
            TaskStatus::PartiallyCompleted
        } else {
            TaskStatus::Completed
        };
        self.validate_transition(status)?;
        self.status = status;
        self.result = Some(result);
        self.completed_at = Some(now);
        Ok(self)
    }

    pub fn fail(mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.failed_stage = Some(self.stage);
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        Ok(self)
    }

    pub fn cancel(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(TaskStatus::Cancelled)?;
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(self)
    }

    /// Wall time between start and completion.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    fn validate_transition(&self, to: TaskStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            (TaskStatus::Pending, TaskStatus::Failed) => true,

            (TaskStatus::Running, TaskStatus::Completed) => true,
            (TaskStatus::Running, TaskStatus::PartiallyCompleted) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Cancelled) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
