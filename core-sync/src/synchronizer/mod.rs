//! # Resource Synchronizer
//!
//! Generic reconciliation of one resource collection against its remote
//! listing.
//!
//! ## Overview
//!
//! A [`ResourceSync`] describes one resource type under one parent (zones of
//! a region, VPCs of a provider in a region, ...). The [`Reconciler`] runs
//! the pass:
//!
//! 1. Lock `(resource type, parent id)` for the whole pass
//! 2. Load local records and compare them with the remote listing
//! 3. Delete orphans whose deletion precondition holds
//! 4. Copy remote attributes onto matched records, under a per-record lock.
//!    A rename also takes the naming lock so names stay unique
//! 5. Insert new records under the `(resource type, "name")` naming lock
//!
//! Per-item failures are counted in the [`SyncResult`] and never abort the
//! pass; lock, listing and comparison failures do.
//!
//! ## Idempotence
//!
//! Updates are persisted and counted only when the record actually changed,
//! so a second pass over the same remote state reports no change.

mod inter_vpc;
mod project;
mod region;
mod vpc;
mod zone;

pub use inter_vpc::InterVpcNetworkSync;
pub use project::ExternalProjectSync;
pub use region::{ensure_bindings, ensure_default_region, RegionSync};
pub use vpc::VpcSync;
pub use zone::ZoneSync;

use async_trait::async_trait;
use bridge_traits::audit::{AuditAction, AuditEntry, AuditSink};
use bridge_traits::persistence::{Record, RecordStore};
use bridge_traits::{Clock, LockService};
use core_inventory::diff::{diff_notes, record_diff};
use core_inventory::naming::{generate_name, rename_target};
use core_runtime::events::{CoreEvent, EventBus, ResourceEvent};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::compare::compare_sets;
use crate::error::Result;
use crate::result::SyncResult;

/// Lock key of the naming lock taken while generating names.
pub const NAME_LOCK_KEY: &str = "name";

/// One resource type under one parent scope.
#[async_trait]
pub trait ResourceSync: Send + Sync {
    type Local: Record + Serialize;
    type Remote: Send + Sync;

    fn store(&self) -> &dyn RecordStore<Self::Local>;

    /// Id of the parent scope; the pass lock is taken on it.
    fn parent_id(&self) -> &str;

    async fn list_locals(&self) -> Result<Vec<Self::Local>>;

    fn local_key(&self, local: &Self::Local) -> Option<String>;

    fn remote_key(&self, remote: &Self::Remote) -> Option<String>;

    /// Name a new local record is derived from.
    fn remote_name<'a>(&self, remote: &'a Self::Remote) -> &'a str;

    /// Whether an orphaned local record belongs to this pass. Orphans owned
    /// by someone else are left alone.
    fn owns(&self, _local: &Self::Local) -> bool {
        true
    }

    /// Fails when the record is still in use and must not be deleted.
    async fn check_delete(&self, _local: &Self::Local) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, local: &Self::Local) -> Result<()> {
        self.store().delete(local.id()).await?;
        Ok(())
    }

    /// Copy mutable remote attributes other than the name onto `local`.
    /// Renames go through the naming lock in the reconciler.
    fn apply_remote(&self, local: &mut Self::Local, remote: &Self::Remote);

    fn create_local(&self, remote: &Self::Remote, name: String) -> Self::Local;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Let an empty remote listing delete every local record.
    pub allow_mass_delete: bool,
}

/// Result of a pass plus the (local, remote) pairs that exist afterwards.
#[derive(Debug)]
pub struct SyncOutcome<L, R> {
    pub result: SyncResult,
    pub pairs: Vec<(L, R)>,
}

impl<L, R> SyncOutcome<L, R> {
    pub fn locals(&self) -> impl Iterator<Item = &L> {
        self.pairs.iter().map(|(local, _)| local)
    }
}

/// Runs [`ResourceSync`] passes.
#[derive(Clone)]
pub struct Reconciler {
    locks: Arc<dyn LockService>,
    audit: Arc<dyn AuditSink>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(
        locks: Arc<dyn LockService>,
        audit: Arc<dyn AuditSink>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            locks,
            audit,
            events,
            clock,
        }
    }

    #[instrument(skip_all, fields(parent = %sync.parent_id(), remotes = remotes.len()))]
    pub async fn reconcile<S: ResourceSync>(
        &self,
        sync: &S,
        remotes: Vec<S::Remote>,
        options: ReconcileOptions,
    ) -> Result<SyncOutcome<S::Local, S::Remote>> {
        let keyword = <S::Local as Record>::KEYWORD;
        let _pass = self.locks.lock_object(keyword, sync.parent_id()).await?;

        let remote_count = remotes.len();
        let locals = sync.list_locals().await?;
        let mut comparison = compare_sets(
            locals,
            remotes,
            |local: &S::Local| sync.local_key(local),
            |remote: &S::Remote| sync.remote_key(remote),
        )?;

        let mut result = SyncResult::new();
        let mut pairs = Vec::new();

        let removed: Vec<S::Local> = std::mem::take(&mut comparison.removed)
            .into_iter()
            .filter(|local| sync.owns(local))
            .collect();
        if remote_count == 0 && !removed.is_empty() && !options.allow_mass_delete {
            warn!(
                count = removed.len(),
                "Remote listing is empty; keeping local records outside a full sync"
            );
        } else {
            for local in removed {
                match self.remove_one(sync, &local).await {
                    Ok(()) => result.delete(),
                    Err(e) => {
                        warn!(id = local.id(), error = %e, "Failed to remove {}", keyword);
                        result.delete_error(format!("{} {}: {}", keyword, local.id(), e));
                    }
                }
            }
        }

        for (local, remote) in comparison.take_pairs() {
            match self.update_one(sync, &local, &remote).await {
                Ok((record, changed)) => {
                    if changed {
                        result.update();
                    }
                    pairs.push((record, remote));
                }
                Err(e) => {
                    warn!(id = local.id(), error = %e, "Failed to update {}", keyword);
                    result.update_error(format!("{} {}: {}", keyword, local.id(), e));
                }
            }
        }

        for remote in std::mem::take(&mut comparison.added) {
            match self.add_one(sync, &remote).await {
                Ok(record) => {
                    result.add();
                    pairs.push((record, remote));
                }
                Err(e) => {
                    let name = sync.remote_name(&remote);
                    warn!(name, error = %e, "Failed to add {}", keyword);
                    result.add_error(format!("{} {}: {}", keyword, name, e));
                }
            }
        }

        debug!(resource = keyword, %result, "Reconciliation pass finished");
        Ok(SyncOutcome { result, pairs })
    }

    async fn remove_one<S: ResourceSync>(&self, sync: &S, local: &S::Local) -> Result<()> {
        let keyword = <S::Local as Record>::KEYWORD;
        let _guard = self.locks.lock_object(keyword, local.id()).await?;

        sync.check_delete(local).await?;
        sync.remove(local).await?;

        self.log_audit(AuditEntry::new(keyword, local.id(), local.name(), AuditAction::SyncDelete))
            .await;
        self.events
            .emit(CoreEvent::Resource(ResourceEvent::Deleted {
                resource_type: keyword.to_string(),
                id: local.id().to_string(),
                name: local.name().to_string(),
            }))
            .ok();
        Ok(())
    }

    async fn update_one<S: ResourceSync>(
        &self,
        sync: &S,
        local: &S::Local,
        remote: &S::Remote,
    ) -> Result<(S::Local, bool)> {
        let keyword = <S::Local as Record>::KEYWORD;
        let _guard = self.locks.lock_object(keyword, local.id()).await?;

        let current = sync.store().fetch_by_id(local.id()).await?;
        let mut desired = current.clone();
        sync.apply_remote(&mut desired, remote);

        let remote_name = sync.remote_name(remote);
        let _naming = if current.name() != remote_name {
            let naming = self.locks.lock_object(keyword, NAME_LOCK_KEY).await?;
            desired.set_name(rename_target(sync.store(), &current, remote_name).await?);
            Some(naming)
        } else {
            None
        };

        if record_diff(&current, &desired).is_empty() {
            return Ok((current, false));
        }

        let updated = sync
            .store()
            .update(
                local.id(),
                Box::new(move |row: &mut S::Local| *row = desired),
            )
            .await?;

        let changes = record_diff(&updated.before, &updated.after);
        self.log_audit(
            AuditEntry::new(keyword, updated.after.id(), updated.after.name(), AuditAction::SyncUpdate)
                .with_notes(diff_notes(&changes)),
        )
        .await;
        self.events
            .emit(CoreEvent::Resource(ResourceEvent::Updated {
                resource_type: keyword.to_string(),
                id: updated.after.id().to_string(),
                fields: changes.into_iter().map(|c| c.field).collect(),
            }))
            .ok();

        Ok((updated.after, true))
    }

    async fn add_one<S: ResourceSync>(&self, sync: &S, remote: &S::Remote) -> Result<S::Local> {
        let keyword = <S::Local as Record>::KEYWORD;

        let record = {
            let _naming = self.locks.lock_object(keyword, NAME_LOCK_KEY).await?;
            let name = generate_name(sync.store(), sync.remote_name(remote)).await?;
            sync.store().insert(sync.create_local(remote, name)).await?
        };

        self.log_audit(AuditEntry::new(keyword, record.id(), record.name(), AuditAction::Create))
            .await;
        self.events
            .emit(CoreEvent::Resource(ResourceEvent::Created {
                resource_type: keyword.to_string(),
                id: record.id().to_string(),
                name: record.name().to_string(),
            }))
            .ok();
        Ok(record)
    }

    async fn log_audit(&self, entry: AuditEntry) {
        let entry = entry.with_timestamp(self.clock.now());
        if let Err(e) = self.audit.log_event(entry).await {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}
