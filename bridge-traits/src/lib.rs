//! # Host Bridge Traits
//!
//! Collaborator interfaces the sync engine consumes but does not own.
//!
//! ## Overview
//!
//! The reconciliation core is deployed inside a larger control plane that
//! already has a database, a distributed lock manager, an operation log and a
//! secret store. This crate defines the narrow contracts through which the
//! engine reaches them, plus the remote provider adapter contract every cloud
//! vendor driver implements.
//!
//! ## Traits
//!
//! ### Persistence
//! - [`RecordStore`](persistence::RecordStore) - Typed gateway over one model table
//! - [`Record`](persistence::Record) - Row contract (id, name, filterable fields)
//!
//! ### Coordination
//! - [`LockService`](lock::LockService) - Named object locks
//!
//! ### Remote Providers
//! - [`CloudDriver`](cloud::CloudDriver) - Listing of regions, zones, VPCs, projects
//! - [`CloudDriverFactory`](cloud::CloudDriverFactory) - Connects a driver from credentials
//!
//! ### Security & Audit
//! - [`CredentialVault`](vault::CredentialVault) - Secret encryption
//! - [`AuditSink`](audit::AuditSink) - Operation log
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Implementations
//!
//! | Deployment | Implementation Crate |
//! |------------|---------------------|
//! | Single process / tests | `bridge-local` |
//! | Control plane | provided by the host |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Remote drivers
//! classify failures with [`ProviderErrorKind`](error::ProviderErrorKind).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so one instance can be
//! shared across every sync task.

pub mod audit;
pub mod cloud;
pub mod error;
pub mod lock;
pub mod persistence;
pub mod time;
pub mod vault;

pub use error::{BridgeError, ProviderErrorKind};

// Re-export commonly used types
pub use audit::{AuditAction, AuditEntry, AuditSink};
pub use cloud::{
    CloudDriver, CloudDriverFactory, I18nNames, ProviderCredentials, RemoteInterVpcNetwork,
    RemoteProject, RemoteRegion, RemoteVpc, RemoteZone,
};
pub use lock::{LockGuard, LockService};
pub use persistence::{Condition, Filter, Mutator, Record, RecordStore, Updated};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
pub use vault::CredentialVault;
