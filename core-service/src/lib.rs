//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (locks, audit sink,
//! credential vault, clock) and cloud driver factories into the sync engine.
//! Single-process hosts typically enable the `local-shims` feature, which
//! fills any bridge left unset with the `bridge-local` default; control
//! planes inject their own implementations through [`CoreServiceBuilder`].
//!
//! ```ignore
//! let core = CoreService::builder()
//!     .inventory(inventory)
//!     .driver_factory(Arc::new(AliyunFactory::new()))
//!     .settings_from_env()
//!     .build()
//!     .await?;
//!
//! let task = core.sync_account_and_wait(&account_id, None).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::audit::AuditSink;
use bridge_traits::cloud::CloudDriverFactory;
use bridge_traits::lock::LockService;
use bridge_traits::time::Clock;
use bridge_traits::vault::CredentialVault;
use core_inventory::models::{CloudproviderRegion, SyncStatus};
use core_inventory::Inventory;
use core_runtime::config::{CoreConfig, CoreConfigBuilder, SyncSettings};
use core_runtime::events::{EventBus, EventStream};
use core_runtime::logging::{init_logging, LoggingConfig};
use core_sync::{InMemoryTaskRepository, SyncCoordinator, SyncScope, SyncTask, TaskHandle, TaskId, TaskRepository};
use tracing::info;

/// Builder for [`CoreService`].
#[derive(Default)]
pub struct CoreServiceBuilder {
    config: CoreConfigBuilder,
    settings: Option<SyncSettings>,
    settings_from_env: bool,
    inventory: Option<Inventory>,
    tasks: Option<Arc<dyn TaskRepository>>,
    factories: Vec<Arc<dyn CloudDriverFactory>>,
    logging: Option<LoggingConfig>,
}

impl CoreServiceBuilder {
    pub fn lock_service(mut self, service: Arc<dyn LockService>) -> Self {
        self.config = self.config.lock_service(service);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.config = self.config.audit_sink(sink);
        self
    }

    pub fn credential_vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.config = self.config.credential_vault(vault);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.config = self.config.clock(clock);
        self
    }

    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Apply `CLOUDSYNC_*` environment overrides on top of the settings.
    pub fn settings_from_env(mut self) -> Self {
        self.settings_from_env = true;
        self
    }

    /// Inventory to reconcile. Defaults to an empty in-memory inventory.
    pub fn inventory(mut self, inventory: Inventory) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn task_repository(mut self, tasks: Arc<dyn TaskRepository>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn driver_factory(mut self, factory: Arc<dyn CloudDriverFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Install the global tracing subscriber while building.
    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// # Errors
    ///
    /// - `CapabilityMissing` when a bridge is unset and `local-shims` is off
    /// - `InitializationFailed` for invalid settings or a logging setup failure
    pub async fn build(self) -> Result<CoreService> {
        if let Some(logging) = self.logging {
            init_logging(logging)?;
        }

        let mut settings = self.settings.unwrap_or_default();
        if self.settings_from_env {
            settings = settings.from_env()?;
        }
        let config = self.config.sync_settings(settings).build()?;

        let events = EventBus::new(config.sync.event_buffer_size);
        let inventory = self.inventory.unwrap_or_else(Inventory::in_memory);
        let tasks = self
            .tasks
            .unwrap_or_else(|| Arc::new(InMemoryTaskRepository::new()));
        let coordinator = SyncCoordinator::with_task_repository(&config, inventory, events, tasks);
        for factory in self.factories {
            coordinator.register_driver_factory(factory).await;
        }

        info!(
            max_concurrent_syncs = config.sync.max_concurrent_syncs,
            max_concurrent_region_syncs = config.sync.max_concurrent_region_syncs,
            "Core service ready"
        );
        Ok(CoreService {
            config,
            coordinator: Arc::new(coordinator),
        })
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: CoreConfig,
    coordinator: Arc<SyncCoordinator>,
}

impl CoreService {
    pub fn builder() -> CoreServiceBuilder {
        CoreServiceBuilder::default()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn inventory(&self) -> &Inventory {
        self.coordinator.inventory()
    }

    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Stream of queued/started/stage/completed/failed/cancelled and
    /// resource events.
    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.coordinator.events().subscribe())
    }

    pub async fn register_driver_factory(&self, factory: Arc<dyn CloudDriverFactory>) {
        self.coordinator.register_driver_factory(factory).await;
    }

    pub async fn invalidate_project_mappings(&self) {
        self.coordinator.invalidate_project_mappings().await;
    }

    // =========================================================================
    // Syncs
    // =========================================================================

    pub async fn trigger_account_sync(&self, account_id: &str, scope: Option<SyncScope>) -> Result<TaskHandle> {
        Ok(self.coordinator.trigger_account_sync(account_id, scope).await?)
    }

    pub async fn trigger_provider_sync(&self, provider_id: &str, scope: Option<SyncScope>) -> Result<TaskHandle> {
        Ok(self.coordinator.trigger_provider_sync(provider_id, scope).await?)
    }

    /// Sync an account and return once every sub-task has finished.
    pub async fn sync_account_and_wait(&self, account_id: &str, scope: Option<SyncScope>) -> Result<SyncTask> {
        let handle = self.trigger_account_sync(account_id, scope).await?;
        Ok(handle.wait().await?)
    }

    /// Sync a provider and return once every region sync has finished.
    pub async fn sync_provider_and_wait(&self, provider_id: &str, scope: Option<SyncScope>) -> Result<SyncTask> {
        let handle = self.trigger_provider_sync(provider_id, scope).await?;
        Ok(handle.wait().await?)
    }

    pub async fn cancel_account_sync(&self, account_id: &str) -> Result<()> {
        Ok(self.coordinator.cancel_account_sync(account_id).await?)
    }

    pub async fn cancel_provider_sync(&self, provider_id: &str) -> Result<()> {
        Ok(self.coordinator.cancel_provider_sync(provider_id).await?)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn account_sync_status(&self, account_id: &str) -> Result<SyncStatus> {
        Ok(self.coordinator.account_sync_status(account_id).await?)
    }

    pub async fn provider_sync_status(&self, provider_id: &str) -> Result<SyncStatus> {
        Ok(self.coordinator.provider_sync_status(provider_id).await?)
    }

    pub async fn task(&self, task_id: &TaskId) -> Result<SyncTask> {
        Ok(self.coordinator.task(task_id).await?)
    }

    pub async fn child_tasks(&self, task_id: &TaskId) -> Result<Vec<SyncTask>> {
        Ok(self.coordinator.child_tasks(task_id).await?)
    }

    pub async fn task_history(&self, entity_id: &str) -> Result<Vec<SyncTask>> {
        Ok(self.coordinator.task_history(entity_id).await?)
    }

    pub async fn set_provider_regions_enabled(
        &self,
        provider_id: &str,
        region_ids: &[String],
        enabled: bool,
    ) -> Result<Vec<CloudproviderRegion>> {
        Ok(self
            .coordinator
            .set_provider_regions_enabled(provider_id, region_ids, enabled)
            .await?)
    }
}
