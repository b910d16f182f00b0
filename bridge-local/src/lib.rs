//! # Local Bridge Implementations
//!
//! Single-process implementations of the bridge traits.
//!
//! ## Overview
//!
//! This crate lets the sync engine run without a surrounding control plane:
//! - `RecordStore` using an in-memory table per model
//! - `LockService` using a Tokio mutex per `(scope, key)`
//! - `AuditSink` recording into memory or forwarding to `tracing`
//! - `CredentialVault` using reversible base64 encoding (development only)
//! - `Clock` that tests can move by hand
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_local::{LocalLockManager, MemoryAuditLog, MemoryRecordStore};
//! use std::sync::Arc;
//!
//! let locks = Arc::new(LocalLockManager::new());
//! let audit = Arc::new(MemoryAuditLog::new());
//! let zones = Arc::new(MemoryRecordStore::<Zone>::new());
//! ```

mod audit;
mod clock;
mod lock;
mod store;
mod vault;

pub use audit::{MemoryAuditLog, TracingAuditSink};
pub use clock::ManualClock;
pub use lock::LocalLockManager;
pub use store::MemoryRecordStore;
pub use vault::Base64CredentialVault;
