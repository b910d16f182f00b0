//! # Cloud Inventory Module
//!
//! Owns the local model of cloud accounts, providers and the resources
//! mirrored from them.
//!
//! ## Overview
//!
//! This module manages:
//! - Domain models and their sync bookkeeping (`SyncState`, `Syncable`)
//! - Typed record stores bundled as an [`Inventory`]
//! - Collision-free naming of mirrored resources
//! - Field diffs written to the audit trail on sync updates

pub mod diff;
pub mod error;
pub mod inventory;
pub mod models;
pub mod naming;

pub use error::{InventoryError, Result};
pub use inventory::Inventory;
pub use models::{
    Cloudaccount, Cloudprovider, CloudproviderRegion, Cloudregion, Enableable, ExternalProject,
    HealthStatus, Host, InterVpcNetwork, ProjectMappingRule, ProjectRule, ProviderStatus,
    SyncState, SyncStatus, Syncable, Vpc, Zone, DEFAULT_REGION_ID,
};
