//! Audit sinks

use async_trait::async_trait;
use bridge_traits::{
    audit::{AuditAction, AuditEntry, AuditSink},
    error::Result,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Keeps every audit entry in memory for later inspection.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    pub async fn entries_for(&self, entity_id: &str) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub async fn count_action(&self, action: AuditAction) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.action == action)
            .count()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn log_event(&self, entry: AuditEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}

/// Writes audit entries as `tracing` events under the `audit` target.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_event(&self, entry: AuditEntry) -> Result<()> {
        if entry.success {
            info!(
                target: "audit",
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                entity_name = %entry.entity_name,
                action = entry.action.as_str(),
                notes = %entry.notes,
                "audit"
            );
        } else {
            warn!(
                target: "audit",
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                entity_name = %entry.entity_name,
                action = entry.action.as_str(),
                notes = %entry.notes,
                "audit (failed)"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_audit_log_filters() {
        let log = MemoryAuditLog::new();
        log.log_event(AuditEntry::new("zone", "z1", "a", AuditAction::Create))
            .await
            .unwrap();
        log.log_event(AuditEntry::new("zone", "z2", "b", AuditAction::SyncDelete))
            .await
            .unwrap();
        log.log_event(AuditEntry::new("zone", "z1", "a", AuditAction::SyncUpdate))
            .await
            .unwrap();

        assert_eq!(log.entries().await.len(), 3);
        assert_eq!(log.entries_for("z1").await.len(), 2);
        assert_eq!(log.count_action(AuditAction::SyncDelete).await, 1);

        log.clear().await;
        assert!(log.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_entries() {
        let sink = TracingAuditSink;
        sink.log_event(AuditEntry::new("vpc", "v1", "vpc-1", AuditAction::Create).failed())
            .await
            .unwrap();
    }
}
