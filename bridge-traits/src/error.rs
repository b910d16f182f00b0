use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Normalized failure classes reported by remote provider adapters.
///
/// Every vendor driver maps its native error codes onto this set so the
/// sync engine can react uniformly (skip unsupported resource types, mark
/// the provider unhealthy on auth failures, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    NotSupported,
    NotImplemented,
    AuthFailure,
    RateLimited,
    Unknown,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::NotSupported => "not_supported",
            ProviderErrorKind::NotImplemented => "not_implemented",
            ProviderErrorKind::AuthFailure => "auth_failure",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Unknown => "unknown",
        }
    }

    /// The resource type simply does not exist on this provider.
    pub fn is_absent_capability(&self) -> bool {
        matches!(
            self,
            ProviderErrorKind::NotSupported | ProviderErrorKind::NotImplemented
        )
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Provider error ({kind}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        BridgeError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        BridgeError::Provider {
            kind,
            message: message.into(),
        }
    }

    /// Provider kind carried by this error, if it came from a remote driver.
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            BridgeError::Provider { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
