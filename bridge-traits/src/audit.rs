//! Audit Trail Sink
//!
//! Operation log entries written by the sync engine: lifecycle milestones of
//! account/provider syncs and per-resource create/update/delete records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Syncing,
    SyncComplete,
    SyncFailed,
    SyncCancel,
    Create,
    SyncUpdate,
    SyncDelete,
    HealthUpdate,
    Enable,
    Disable,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Syncing => "syncing",
            AuditAction::SyncComplete => "sync_complete",
            AuditAction::SyncFailed => "sync_failed",
            AuditAction::SyncCancel => "sync_cancel",
            AuditAction::Create => "create",
            AuditAction::SyncUpdate => "sync_update",
            AuditAction::SyncDelete => "sync_delete",
            AuditAction::HealthUpdate => "health_update",
            AuditAction::Enable => "enable",
            AuditAction::Disable => "disable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub action: AuditAction,
    pub success: bool,
    /// Free-form details: field diffs, error text, sync summaries.
    pub notes: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        action: AuditAction,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            action,
            success: true,
            notes: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_notes(mut self, notes: serde_json::Value) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// Destination for audit entries.
///
/// Audit writes are best effort from the engine's point of view: a failing
/// sink is logged and never aborts a sync.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_event(&self, entry: AuditEntry) -> Result<()>;
}
