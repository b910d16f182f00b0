//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service` with its `local-shims` bridges).
//! Host applications can depend on `cloudsync-workspace` and enable the
//! documented features without needing to wire each crate individually.

#[cfg(feature = "local-shims")]
pub use core_service::{CoreService, CoreServiceBuilder};
