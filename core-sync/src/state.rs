//! # Sync State Machine
//!
//! Lifecycle of accounts, providers and provider-region bindings:
//!
//! ```text
//! idle -> queuing -> queued -> syncing -> idle
//!    \________ any failure forces idle ________/
//! ```
//!
//! ## Rules
//!
//! - Every transition re-reads the entity under its object lock
//! - Queuing an account queues its enabled providers and their in-scope
//!   bindings; children that cannot be queued are left out, not fatal
//! - An entity only returns to idle once all of its children are idle
//! - A sync task returns its own entity to idle in its completion stage. The
//!   only roll-up from child to parent is an account held on behalf of a
//!   standalone provider sync, which follows its providers back to idle
//! - Only a sync that is still queuing can be cancelled
//!
//! Locks are taken parent before child and a child lock is always released
//! before its parent is rolled up.

use bridge_traits::persistence::{Record, RecordStore};
use bridge_traits::{Clock, LockGuard, LockService};
use chrono::Duration;
use core_inventory::models::{
    Cloudaccount, Cloudprovider, CloudproviderRegion, Enableable, SyncState, SyncStatus, Syncable,
};
use core_inventory::Inventory;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::scope::SyncScope;

/// Children whose state gates a parent's return to idle.
#[derive(Debug, Clone, Copy)]
enum Children<'a> {
    None,
    ProvidersOf(&'a str),
    BindingsOf(&'a str),
}

pub struct SyncStateMachine {
    inventory: Inventory,
    locks: Arc<dyn LockService>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    /// Accounts held in `syncing` by a standalone provider sync.
    held: Mutex<HashSet<String>>,
}

impl SyncStateMachine {
    pub fn new(
        inventory: Inventory,
        locks: Arc<dyn LockService>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
    ) -> Self {
        Self {
            inventory,
            locks,
            clock,
            stale_after,
            held: Mutex::new(HashSet::new()),
        }
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Idle, or stuck in a sync that started longer ago than the stale timeout.
    ///
    /// A non-idle entity that never started (`last_sync` unset) is not stale;
    /// only `force` gets past it.
    pub fn can_sync<T: Syncable>(&self, record: &T) -> bool {
        let state = record.sync_state();
        if state.sync_status.is_idle() {
            return true;
        }
        state
            .last_sync
            .map(|started| self.clock.now() - started > self.stale_after)
            .unwrap_or(false)
    }

    pub fn admit<T: Syncable>(&self, record: &T, force: bool) -> Result<()> {
        if force || self.can_sync(record) {
            return Ok(());
        }
        Err(SyncError::invalid_status(
            T::KEYWORD,
            record.id(),
            record.sync_status(),
            "a sync is already in progress",
        ))
    }

    pub async fn admit_account(&self, account_id: &str, force: bool) -> Result<Cloudaccount> {
        let account = self.inventory.account(account_id).await?;
        ensure_enabled(&account)?;
        self.admit(&account, force)?;
        Ok(account)
    }

    /// Provider admission also requires the owning account to be free, so a
    /// provider sync never overlaps a sync of its account.
    pub async fn admit_provider(&self, provider_id: &str, force: bool) -> Result<Cloudprovider> {
        let provider = self.inventory.provider(provider_id).await?;
        ensure_enabled(&provider)?;
        let account = self.inventory.account(&provider.cloudaccount_id).await?;
        ensure_enabled(&account)?;
        self.admit(&provider, force)?;
        self.admit(&account, force)?;
        Ok(provider)
    }

    // =========================================================================
    // Queuing
    // =========================================================================

    /// Queue an account and propagate to its enabled providers and their
    /// in-scope bindings. Returns the ids of the providers that were queued.
    #[instrument(skip(self, scope))]
    pub async fn mark_account_queuing(&self, account_id: &str, scope: &SyncScope) -> Result<Vec<String>> {
        self.queue_one(self.inventory.accounts.as_ref(), account_id, scope.force)
            .await?;
        // The account sync owns the account from here on.
        self.held.lock().await.remove(account_id);

        let providers = match self.inventory.enabled_providers(account_id).await {
            Ok(providers) => providers,
            Err(e) => {
                self.abort_queuing(self.inventory.accounts.as_ref(), account_id)
                    .await;
                return Err(e.into());
            }
        };

        let mut queued = Vec::new();
        for provider in providers {
            match self.queue_provider_tree(&provider.id, scope).await {
                Ok(_) => queued.push(provider.id),
                Err(e) => {
                    debug!(provider_id = %provider.id, error = %e, "Provider left out of account sync")
                }
            }
        }
        info!(providers = queued.len(), "Account queued");
        Ok(queued)
    }

    /// Queue a provider and its in-scope bindings. Returns the queued binding ids.
    #[instrument(skip(self, scope))]
    pub async fn mark_provider_queuing(&self, provider_id: &str, scope: &SyncScope) -> Result<Vec<String>> {
        self.queue_provider_tree(provider_id, scope).await
    }

    pub async fn mark_binding_queuing(&self, binding_id: &str, force: bool) -> Result<CloudproviderRegion> {
        self.queue_one(self.inventory.provider_regions.as_ref(), binding_id, force)
            .await
    }

    async fn queue_provider_tree(&self, provider_id: &str, scope: &SyncScope) -> Result<Vec<String>> {
        self.queue_one(self.inventory.providers.as_ref(), provider_id, scope.force)
            .await?;

        let bindings = match self.inventory.bindings_of_provider(provider_id).await {
            Ok(bindings) => bindings,
            Err(e) => {
                self.abort_queuing(self.inventory.providers.as_ref(), provider_id)
                    .await;
                return Err(e.into());
            }
        };

        let mut queued = Vec::new();
        for binding in bindings {
            if !binding.enabled || !scope.includes_region(&binding.cloudregion_id) {
                continue;
            }
            match self.mark_binding_queuing(&binding.id, scope.force).await {
                Ok(_) => queued.push(binding.id),
                Err(e) => debug!(binding_id = %binding.id, error = %e, "Binding left out of sync"),
            }
        }
        Ok(queued)
    }

    /// Mark the account as syncing on behalf of one of its providers, so an
    /// account sync cannot start until the provider finishes. The account is
    /// only taken when idle, stale or `force`d; the last provider to finish
    /// rolls it back to idle.
    pub async fn hold_account(&self, account_id: &str, force: bool) -> Result<()> {
        let _guard = self.lock::<Cloudaccount>(account_id).await?;
        let account = self.inventory.accounts.fetch_by_id(account_id).await?;
        if account.sync_status().is_idle() || force || self.can_sync(&account) {
            let now = self.clock.now();
            write_state(self.inventory.accounts.as_ref(), account_id, move |s| {
                s.sync_status = SyncStatus::Syncing;
                s.last_sync = Some(now);
                s.last_sync_end_at = None;
            })
            .await?;
            self.held.lock().await.insert(account_id.to_string());
        }
        Ok(())
    }

    pub async fn is_held(&self, account_id: &str) -> bool {
        self.held.lock().await.contains(account_id)
    }

    // =========================================================================
    // Queued / Syncing
    // =========================================================================

    pub async fn mark_account_queued(&self, account_id: &str) -> Result<Cloudaccount> {
        self.queued_one(self.inventory.accounts.as_ref(), account_id).await
    }

    pub async fn mark_provider_queued(&self, provider_id: &str) -> Result<Cloudprovider> {
        self.queued_one(self.inventory.providers.as_ref(), provider_id).await
    }

    pub async fn mark_account_syncing(&self, account_id: &str) -> Result<Cloudaccount> {
        self.syncing_one(self.inventory.accounts.as_ref(), account_id).await
    }

    pub async fn mark_provider_syncing(&self, provider_id: &str) -> Result<Cloudprovider> {
        self.syncing_one(self.inventory.providers.as_ref(), provider_id).await
    }

    pub async fn mark_binding_syncing(&self, binding_id: &str) -> Result<CloudproviderRegion> {
        self.syncing_one(self.inventory.provider_regions.as_ref(), binding_id)
            .await
    }

    // =========================================================================
    // End of sync
    // =========================================================================

    /// Returns `true` if the account moved to idle.
    pub async fn mark_account_idle(&self, account_id: &str) -> Result<bool> {
        let changed = self
            .idle_one(
                self.inventory.accounts.as_ref(),
                account_id,
                Children::ProvidersOf(account_id),
                None,
            )
            .await?;
        if changed {
            self.held.lock().await.remove(account_id);
        }
        Ok(changed)
    }

    /// Returns `true` if the provider moved to idle. Rolls the account up.
    pub async fn mark_provider_idle(&self, provider_id: &str) -> Result<bool> {
        let provider = self.inventory.provider(provider_id).await?;
        let changed = self
            .idle_one(
                self.inventory.providers.as_ref(),
                provider_id,
                Children::BindingsOf(provider_id),
                None,
            )
            .await?;
        self.roll_up_account(&provider.cloudaccount_id).await?;
        Ok(changed)
    }

    /// Returns `true` if the binding moved to idle. The provider task that
    /// spawned the binding sync ends the provider.
    pub async fn mark_binding_idle(&self, binding_id: &str) -> Result<bool> {
        self.idle_one(
            self.inventory.provider_regions.as_ref(),
            binding_id,
            Children::None,
            None,
        )
        .await
    }

    /// Release a held account once its providers are idle. An account that
    /// runs its own sync is left to that sync's completion.
    async fn roll_up_account(&self, account_id: &str) -> Result<()> {
        if !self.is_held(account_id).await {
            return Ok(());
        }
        let rolled = self
            .idle_one(
                self.inventory.accounts.as_ref(),
                account_id,
                Children::ProvidersOf(account_id),
                Some(SyncStatus::Syncing),
            )
            .await?;
        if rolled {
            self.held.lock().await.remove(account_id);
            debug!(account_id, "Account rolled up to idle");
        }
        Ok(())
    }

    // =========================================================================
    // Failure & cancellation
    // =========================================================================

    /// Record `error` and force the account idle, releasing pending children.
    pub async fn fail_account(&self, account_id: &str, error: &str) -> Result<()> {
        self.fail_one(self.inventory.accounts.as_ref(), account_id, error)
            .await?;
        self.held.lock().await.remove(account_id);
        self.revert_pending_providers(account_id).await?;
        Ok(())
    }

    pub async fn fail_provider(&self, provider_id: &str, error: &str) -> Result<()> {
        let provider = self.inventory.provider(provider_id).await?;
        self.fail_one(self.inventory.providers.as_ref(), provider_id, error)
            .await?;
        self.revert_pending_bindings(provider_id).await?;
        self.roll_up_account(&provider.cloudaccount_id).await
    }

    pub async fn fail_binding(&self, binding_id: &str, error: &str) -> Result<()> {
        self.fail_one(self.inventory.provider_regions.as_ref(), binding_id, error)
            .await
    }

    /// Revert a queuing account sync. `token` is cancelled while the account
    /// lock is held, after the status check succeeded.
    #[instrument(skip(self, token))]
    pub async fn cancel_account_starting_sync(
        &self,
        account_id: &str,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        let _guard = self.lock::<Cloudaccount>(account_id).await?;
        let account = self.inventory.accounts.fetch_by_id(account_id).await?;
        ensure_queuing(&account)?;

        if let Some(token) = token {
            token.cancel();
        }
        self.revert_pending_providers(account_id).await?;
        write_state(self.inventory.accounts.as_ref(), account_id, |s| {
            s.sync_status = SyncStatus::Idle;
        })
        .await?;
        self.held.lock().await.remove(account_id);
        info!("Account sync cancelled");
        Ok(())
    }

    #[instrument(skip(self, token))]
    pub async fn cancel_provider_starting_sync(
        &self,
        provider_id: &str,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        let account_id = {
            let _guard = self.lock::<Cloudprovider>(provider_id).await?;
            let provider = self.inventory.providers.fetch_by_id(provider_id).await?;
            ensure_queuing(&provider)?;

            if let Some(token) = token {
                token.cancel();
            }
            self.revert_pending_bindings(provider_id).await?;
            write_state(self.inventory.providers.as_ref(), provider_id, |s| {
                s.sync_status = SyncStatus::Idle;
            })
            .await?;
            provider.cloudaccount_id
        };
        info!("Provider sync cancelled");
        self.roll_up_account(&account_id).await
    }

    /// Return every queuing/queued provider of the account (and their
    /// pending bindings) to idle. Returns how many providers were reverted.
    pub async fn revert_pending_providers(&self, account_id: &str) -> Result<usize> {
        let mut reverted = 0;
        for provider in self.inventory.providers_of_account(account_id).await? {
            self.revert_pending_bindings(&provider.id).await?;
            if self
                .revert_pending(self.inventory.providers.as_ref(), &provider.id)
                .await?
            {
                reverted += 1;
            }
        }
        Ok(reverted)
    }

    pub async fn revert_pending_bindings(&self, provider_id: &str) -> Result<usize> {
        let mut reverted = 0;
        for binding in self.inventory.bindings_of_provider(provider_id).await? {
            if self
                .revert_pending(self.inventory.provider_regions.as_ref(), &binding.id)
                .await?
            {
                reverted += 1;
            }
        }
        Ok(reverted)
    }

    pub async fn revert_pending_binding(&self, binding_id: &str) -> Result<bool> {
        self.revert_pending(self.inventory.provider_regions.as_ref(), binding_id)
            .await
    }

    // =========================================================================
    // Binding switches
    // =========================================================================

    /// Enable or disable a provider's bindings to the given regions.
    pub async fn set_bindings_enabled(
        &self,
        provider_id: &str,
        region_ids: &[String],
        enabled: bool,
    ) -> Result<Vec<CloudproviderRegion>> {
        let mut changed = Vec::new();
        for region_id in region_ids {
            let binding = self
                .inventory
                .binding(provider_id, region_id)
                .await?
                .ok_or_else(|| SyncError::not_found(CloudproviderRegion::KEYWORD, region_id))?;
            if binding.enabled == enabled {
                continue;
            }

            let _guard = self.lock::<CloudproviderRegion>(&binding.id).await?;
            let updated = self
                .inventory
                .provider_regions
                .update(
                    &binding.id,
                    Box::new(move |b: &mut CloudproviderRegion| b.set_enabled(enabled)),
                )
                .await?;
            changed.push(updated.after);
        }
        Ok(changed)
    }

    // =========================================================================
    // Generic transitions
    // =========================================================================

    async fn lock<T: Record>(&self, id: &str) -> Result<LockGuard> {
        Ok(self.locks.lock_object(T::KEYWORD, id).await?)
    }

    async fn queue_one<T: Syncable + Enableable>(
        &self,
        store: &dyn RecordStore<T>,
        id: &str,
        force: bool,
    ) -> Result<T> {
        let _guard = self.lock::<T>(id).await?;
        let record = store.fetch_by_id(id).await?;
        ensure_enabled(&record)?;

        match record.sync_status() {
            SyncStatus::Queuing => Ok(record),
            SyncStatus::Syncing if !force => Err(SyncError::InvalidStateTransition {
                from: SyncStatus::Syncing.to_string(),
                to: SyncStatus::Queuing.to_string(),
                reason: format!("{} {} is already syncing", T::KEYWORD, id),
            }),
            _ => {
                write_state(store, id, |s| s.sync_status = SyncStatus::Queuing).await
            }
        }
    }

    /// An entity found idle here was cancelled while queuing.
    async fn queued_one<T: Syncable>(&self, store: &dyn RecordStore<T>, id: &str) -> Result<T> {
        let _guard = self.lock::<T>(id).await?;
        let record = store.fetch_by_id(id).await?;

        match record.sync_status() {
            SyncStatus::Queuing => {
                write_state(store, id, |s| s.sync_status = SyncStatus::Queued).await
            }
            SyncStatus::Queued => Ok(record),
            SyncStatus::Idle => Err(SyncError::Cancelled),
            SyncStatus::Syncing => Err(SyncError::InvalidStateTransition {
                from: SyncStatus::Syncing.to_string(),
                to: SyncStatus::Queued.to_string(),
                reason: format!("{} {} is already syncing", T::KEYWORD, id),
            }),
        }
    }

    async fn syncing_one<T: Syncable>(&self, store: &dyn RecordStore<T>, id: &str) -> Result<T> {
        let _guard = self.lock::<T>(id).await?;
        let record = store.fetch_by_id(id).await?;

        match record.sync_status() {
            SyncStatus::Queuing | SyncStatus::Queued => {
                let now = self.clock.now();
                write_state(store, id, move |s| {
                    s.sync_status = SyncStatus::Syncing;
                    s.last_sync = Some(now);
                    s.last_sync_end_at = None;
                    s.last_sync_error = None;
                })
                .await
            }
            SyncStatus::Idle => Err(SyncError::Cancelled),
            SyncStatus::Syncing => Err(SyncError::InvalidStateTransition {
                from: SyncStatus::Syncing.to_string(),
                to: SyncStatus::Syncing.to_string(),
                reason: format!("{} {} is already syncing", T::KEYWORD, id),
            }),
        }
    }

    async fn idle_one<T: Syncable>(
        &self,
        store: &dyn RecordStore<T>,
        id: &str,
        children: Children<'_>,
        only_from: Option<SyncStatus>,
    ) -> Result<bool> {
        let _guard = self.lock::<T>(id).await?;
        let record = store.fetch_by_id(id).await?;
        let status = record.sync_status();

        if status.is_idle() || only_from.is_some_and(|required| required != status) {
            return Ok(false);
        }
        if !self.children_idle(children).await? {
            debug!(entity = T::KEYWORD, id, "Children still busy; staying {}", status);
            return Ok(false);
        }

        let now = self.clock.now();
        write_state(store, id, move |s| {
            s.sync_status = SyncStatus::Idle;
            s.last_sync_end_at = Some(now);
        })
        .await?;
        Ok(true)
    }

    async fn fail_one<T: Syncable>(&self, store: &dyn RecordStore<T>, id: &str, error: &str) -> Result<()> {
        let _guard = self.lock::<T>(id).await?;
        let now = self.clock.now();
        let error = error.to_string();
        write_state(store, id, move |s| {
            s.sync_status = SyncStatus::Idle;
            s.last_sync_end_at = Some(now);
            s.last_sync_error = Some(error);
        })
        .await?;
        Ok(())
    }

    /// Undo queuing of an entity whose children could not be listed.
    async fn abort_queuing<T: Syncable>(&self, store: &dyn RecordStore<T>, id: &str) {
        if let Err(e) = self.revert_pending(store, id).await {
            warn!(entity = T::KEYWORD, id, error = %e, "Failed to revert queuing");
        }
    }

    async fn revert_pending<T: Syncable>(&self, store: &dyn RecordStore<T>, id: &str) -> Result<bool> {
        let _guard = self.lock::<T>(id).await?;
        let record = store.fetch_by_id(id).await?;
        if !record.sync_status().is_pending() {
            return Ok(false);
        }
        write_state(store, id, |s| s.sync_status = SyncStatus::Idle).await?;
        Ok(true)
    }

    async fn children_idle(&self, children: Children<'_>) -> Result<bool> {
        Ok(match children {
            Children::None => true,
            Children::ProvidersOf(account_id) => self
                .inventory
                .providers_of_account(account_id)
                .await?
                .iter()
                .all(|p| p.sync_status().is_idle()),
            Children::BindingsOf(provider_id) => self
                .inventory
                .bindings_of_provider(provider_id)
                .await?
                .iter()
                .all(|b| b.sync_status().is_idle()),
        })
    }
}

async fn write_state<T, F>(store: &dyn RecordStore<T>, id: &str, apply: F) -> Result<T>
where
    T: Syncable,
    F: FnOnce(&mut SyncState) + Send + 'static,
{
    let updated = store
        .update(id, Box::new(move |row: &mut T| apply(row.sync_state_mut())))
        .await?;
    Ok(updated.after)
}

fn ensure_enabled<T: Record + Enableable>(record: &T) -> Result<()> {
    if record.is_enabled() {
        Ok(())
    } else {
        Err(SyncError::invalid_status(
            T::KEYWORD,
            record.id(),
            "disabled",
            "cannot sync a disabled entity",
        ))
    }
}

fn ensure_queuing<T: Syncable>(record: &T) -> Result<()> {
    if record.sync_status() == SyncStatus::Queuing {
        Ok(())
    } else {
        Err(SyncError::invalid_status(
            T::KEYWORD,
            record.id(),
            record.sync_status(),
            "only a queuing sync can be cancelled",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_local::{LocalLockManager, ManualClock};
    use core_inventory::models::Cloudregion;

    struct Fixture {
        inventory: Inventory,
        clock: Arc<ManualClock>,
        machine: SyncStateMachine,
        account: Cloudaccount,
        provider: Cloudprovider,
        bindings: Vec<CloudproviderRegion>,
    }

    fn region(id: &str) -> Cloudregion {
        let mut region = Cloudregion::default_region();
        region.id = id.to_string();
        region.name = id.to_string();
        region
    }

    async fn fixture() -> Fixture {
        let inventory = Inventory::in_memory();
        let clock = Arc::new(ManualClock::default());
        let machine = SyncStateMachine::new(
            inventory.clone(),
            Arc::new(LocalLockManager::new()),
            clock.clone(),
            Duration::minutes(30),
        );

        let account = inventory
            .accounts
            .insert(Cloudaccount::new("acc", "aliyun"))
            .await
            .unwrap();
        let provider = inventory
            .providers
            .insert(Cloudprovider::new(&account, "prod"))
            .await
            .unwrap();
        let mut bindings = Vec::new();
        for id in ["r1", "r2"] {
            let region = inventory.regions.insert(region(id)).await.unwrap();
            bindings.push(
                inventory
                    .provider_regions
                    .insert(CloudproviderRegion::new(&provider, &region))
                    .await
                    .unwrap(),
            );
        }

        Fixture {
            inventory,
            clock,
            machine,
            account,
            provider,
            bindings,
        }
    }

    async fn status_of_binding(f: &Fixture, index: usize) -> SyncStatus {
        f.inventory
            .provider_regions
            .fetch_by_id(&f.bindings[index].id)
            .await
            .unwrap()
            .sync_status()
    }

    #[tokio::test]
    async fn test_account_queuing_propagates_to_in_scope_bindings() {
        let f = fixture().await;
        let scope = SyncScope::default().with_regions(["r1"]);

        let providers = f.machine.mark_account_queuing(&f.account.id, &scope).await.unwrap();

        assert_eq!(providers, vec![f.provider.id.clone()]);
        let account = f.inventory.account(&f.account.id).await.unwrap();
        assert_eq!(account.sync_status(), SyncStatus::Queuing);
        let provider = f.inventory.provider(&f.provider.id).await.unwrap();
        assert_eq!(provider.sync_status(), SyncStatus::Queuing);
        assert_eq!(status_of_binding(&f, 0).await, SyncStatus::Queuing);
        assert_eq!(status_of_binding(&f, 1).await, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_admission_refuses_busy_entity_unless_forced_or_stale() {
        let f = fixture().await;
        f.machine
            .mark_account_queuing(&f.account.id, &SyncScope::full())
            .await
            .unwrap();
        f.machine.mark_account_queued(&f.account.id).await.unwrap();
        f.machine.mark_account_syncing(&f.account.id).await.unwrap();

        let err = f.machine.admit_account(&f.account.id, false).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidStatus { .. }));
        assert!(f.machine.admit_account(&f.account.id, true).await.is_ok());

        // Provider admission follows the account
        let err = f.machine.admit_provider(&f.provider.id, false).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidStatus { .. }));

        f.clock.advance(Duration::minutes(31));
        assert!(f.machine.admit_account(&f.account.id, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_entity_cannot_be_queued() {
        let f = fixture().await;
        f.inventory
            .accounts
            .update(&f.account.id, Box::new(|a: &mut Cloudaccount| a.enabled = false))
            .await
            .unwrap();

        let err = f
            .machine
            .mark_account_queuing(&f.account.id, &SyncScope::full())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStatus { status, .. } if status == "disabled"));
    }

    #[tokio::test]
    async fn test_provider_waits_for_bindings_and_releases_held_account() {
        let f = fixture().await;
        f.machine
            .mark_provider_queuing(&f.provider.id, &SyncScope::full())
            .await
            .unwrap();
        f.machine.hold_account(&f.account.id, false).await.unwrap();
        assert!(f.machine.is_held(&f.account.id).await);
        f.machine.mark_provider_queued(&f.provider.id).await.unwrap();
        f.machine.mark_provider_syncing(&f.provider.id).await.unwrap();
        for binding in &f.bindings {
            f.machine.mark_binding_syncing(&binding.id).await.unwrap();
        }

        assert!(!f.machine.mark_provider_idle(&f.provider.id).await.unwrap());

        assert!(f.machine.mark_binding_idle(&f.bindings[0].id).await.unwrap());
        assert!(f.machine.mark_binding_idle(&f.bindings[1].id).await.unwrap());
        // Bindings never end their provider; its own task does
        let provider = f.inventory.provider(&f.provider.id).await.unwrap();
        assert_eq!(provider.sync_status(), SyncStatus::Syncing);

        assert!(f.machine.mark_provider_idle(&f.provider.id).await.unwrap());
        let provider = f.inventory.provider(&f.provider.id).await.unwrap();
        assert!(provider.sync.last_sync_end_at.is_some());
        let account = f.inventory.account(&f.account.id).await.unwrap();
        assert_eq!(account.sync_status(), SyncStatus::Idle);
        assert!(!f.machine.is_held(&f.account.id).await);

        // Already idle
        assert!(!f.machine.mark_provider_idle(&f.provider.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_provider_end_leaves_account_sync_running() {
        let f = fixture().await;
        f.machine
            .mark_account_queuing(&f.account.id, &SyncScope::full())
            .await
            .unwrap();
        f.machine.mark_account_queued(&f.account.id).await.unwrap();
        f.machine.mark_account_syncing(&f.account.id).await.unwrap();
        f.machine.mark_provider_queued(&f.provider.id).await.unwrap();
        f.machine.mark_provider_syncing(&f.provider.id).await.unwrap();
        f.machine.revert_pending_bindings(&f.provider.id).await.unwrap();

        assert!(f.machine.mark_provider_idle(&f.provider.id).await.unwrap());
        let account = f.inventory.account(&f.account.id).await.unwrap();
        assert_eq!(account.sync_status(), SyncStatus::Syncing);
        assert!(f.machine.admit_account(&f.account.id, false).await.is_err());

        f.machine
            .fail_provider(&f.provider.id, "late failure")
            .await
            .unwrap();
        let account = f.inventory.account(&f.account.id).await.unwrap();
        assert_eq!(account.sync_status(), SyncStatus::Syncing);

        assert!(f.machine.mark_account_idle(&f.account.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_account_sync_takes_over_a_held_account() {
        let f = fixture().await;
        f.machine.hold_account(&f.account.id, false).await.unwrap();
        f.machine
            .mark_account_queuing(&f.account.id, &SyncScope::full().with_force(true))
            .await
            .unwrap();
        assert!(!f.machine.is_held(&f.account.id).await);
    }

    #[tokio::test]
    async fn test_cancel_only_while_queuing() {
        let f = fixture().await;
        f.machine
            .mark_account_queuing(&f.account.id, &SyncScope::full())
            .await
            .unwrap();
        let token = CancellationToken::new();

        f.machine
            .cancel_account_starting_sync(&f.account.id, Some(&token))
            .await
            .unwrap();

        assert!(token.is_cancelled());
        let provider = f.inventory.provider(&f.provider.id).await.unwrap();
        assert!(provider.sync_status().is_idle());
        assert_eq!(status_of_binding(&f, 0).await, SyncStatus::Idle);
        // A task that reaches its first stage now sees the cancellation
        assert!(matches!(
            f.machine.mark_account_queued(&f.account.id).await,
            Err(SyncError::Cancelled)
        ));

        f.machine
            .mark_account_queuing(&f.account.id, &SyncScope::full())
            .await
            .unwrap();
        f.machine.mark_account_queued(&f.account.id).await.unwrap();
        let token = CancellationToken::new();
        let err = f
            .machine
            .cancel_account_starting_sync(&f.account.id, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStatus { status, .. } if status == "queued"));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_failure_forces_idle_and_releases_pending_children() {
        let f = fixture().await;
        f.machine
            .mark_account_queuing(&f.account.id, &SyncScope::full())
            .await
            .unwrap();
        f.machine.mark_account_queued(&f.account.id).await.unwrap();

        f.machine
            .fail_account(&f.account.id, "provider unreachable")
            .await
            .unwrap();

        let account = f.inventory.account(&f.account.id).await.unwrap();
        assert!(account.sync_status().is_idle());
        assert_eq!(account.sync.last_sync_error.as_deref(), Some("provider unreachable"));
        let provider = f.inventory.provider(&f.provider.id).await.unwrap();
        assert!(provider.sync_status().is_idle());
        assert_eq!(status_of_binding(&f, 1).await, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_queuing_a_syncing_entity_requires_force() {
        let f = fixture().await;
        let binding = &f.bindings[0];
        f.machine.mark_binding_queuing(&binding.id, false).await.unwrap();
        f.machine.mark_binding_syncing(&binding.id).await.unwrap();

        let err = f.machine.mark_binding_queuing(&binding.id, false).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
        let binding = f.machine.mark_binding_queuing(&binding.id, true).await.unwrap();
        assert_eq!(binding.sync_status(), SyncStatus::Queuing);
    }

    #[tokio::test]
    async fn test_set_bindings_enabled() {
        let f = fixture().await;
        let changed = f
            .machine
            .set_bindings_enabled(&f.provider.id, &["r2".to_string()], false)
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert!(!changed[0].enabled);

        let err = f
            .machine
            .set_bindings_enabled(&f.provider.id, &["nope".to_string()], true)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }
}
