use bridge_traits::error::{BridgeError, ProviderErrorKind};
use core_inventory::InventoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: String, id: String },

    #[error("{entity_type} {id} is {status}: {reason}")]
    InvalidStatus {
        entity_type: String,
        id: String,
        status: String,
        reason: String,
    },

    #[error("Comparison failed: {0}")]
    Comparison(String),

    #[error("Remote provider unavailable ({kind}): {message}")]
    RemoteUnavailable {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("No cloud driver registered for vendor {vendor}")]
    DriverNotFound { vendor: String },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Sync task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn invalid_status(
        entity_type: impl Into<String>,
        id: impl Into<String>,
        status: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        SyncError::InvalidStatus {
            entity_type: entity_type.into(),
            id: id.into(),
            status: status.to_string(),
            reason: reason.into(),
        }
    }

    /// The provider reported that the listed resource type does not exist.
    pub fn is_absent_capability(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable { kind, .. } if kind.is_absent_capability()
        )
    }

    /// Failures that say the provider itself is unreachable or refuses us.
    pub fn is_connectivity_failure(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable { kind, .. } if !kind.is_absent_capability()
        )
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NotFound { entity, id } => SyncError::NotFound {
                entity_type: entity,
                id,
            },
            BridgeError::Provider { kind, message } => {
                SyncError::RemoteUnavailable { kind, message }
            }
            BridgeError::Lock(message) => SyncError::Lock(message),
            other => SyncError::Storage(other.to_string()),
        }
    }
}

impl From<InventoryError> for SyncError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::NotFound { entity_type, id } => {
                SyncError::NotFound { entity_type, id }
            }
            InventoryError::Bridge(bridge) => bridge.into(),
            InventoryError::InvalidInput { field, message } => {
                SyncError::InvalidInput { field, message }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_errors_map_onto_taxonomy() {
        let err: SyncError = BridgeError::not_found("zone", "z1").into();
        assert!(matches!(err, SyncError::NotFound { .. }));

        let err: SyncError =
            BridgeError::provider(ProviderErrorKind::AuthFailure, "bad key").into();
        assert!(err.is_connectivity_failure());
        assert!(!err.is_absent_capability());

        let err: SyncError =
            BridgeError::provider(ProviderErrorKind::NotImplemented, "no vpcs").into();
        assert!(err.is_absent_capability());

        let err: SyncError = BridgeError::Storage("disk full".to_string()).into();
        assert!(matches!(err, SyncError::Storage(msg) if msg.contains("disk full")));
    }

    #[test]
    fn test_invalid_status_display() {
        let err = SyncError::invalid_status("cloudaccount", "a1", "syncing", "sync in progress");
        assert_eq!(
            err.to_string(),
            "cloudaccount a1 is syncing: sync in progress"
        );
    }
}
