//! # Sync Engine
//!
//! Reconciles the local inventory of cloud accounts, providers, regions and
//! their resources with what each cloud reports.
//!
//! ## Overview
//!
//! A sync request for an account or a provider becomes a tree of staged
//! tasks: the account task prepares regions and fans out to provider tasks,
//! which fan out to one task per provider-region binding. Each task runs
//! reconciliation passes that add, update and delete local records so they
//! match the remote listing.
//!
//! ## Components
//!
//! - **Comparator** (`compare`): Splits local and remote sets by external id
//! - **Resource Synchronizer** (`synchronizer`): Locked, audited reconciliation passes
//! - **Sync State Machine** (`state`): `idle → queuing → queued → syncing → idle`
//!   with admission control and parent roll-up
//! - **Staged Tasks** (`tasks`): Account, provider and region task stages
//! - **Sync Coordinator** (`coordinator`): Triggering, scheduling and cancellation
//! - **Scope Resolver** (`scope`): Canonical region sets from ids or names
//! - **Project Mapping Cache** (`project_mapping`): Project assignment rules
//! - **Driver Registry** (`driver`): Vendor drivers with decrypted credentials
//! - **Task Records** (`job`, `repository`): Persistent task state and results

pub mod compare;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod job;
pub mod project_mapping;
pub mod repository;
pub mod result;
pub mod scope;
pub mod state;
pub mod synchronizer;
pub mod tasks;

pub use compare::{compare_sets, Comparison};
pub use coordinator::{SyncCoordinator, TaskHandle};
pub use driver::DriverRegistry;
pub use error::{Result, SyncError};
pub use job::{SyncTask, TaskId, TaskKind, TaskStage, TaskStatus};
pub use project_mapping::{MappingSource, ProjectMapping, ProjectMappingCache};
pub use repository::{InMemoryTaskRepository, TaskRepository};
pub use result::SyncResult;
pub use scope::{ScopeResolver, SyncScope};
pub use state::SyncStateMachine;
pub use synchronizer::{ReconcileOptions, Reconciler, ResourceSync, SyncOutcome};
pub use tasks::{StageOutcome, StagedTask, SyncContext};
