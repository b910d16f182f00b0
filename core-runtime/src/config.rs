//! # Core Configuration Module
//!
//! Provides configuration management for the sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the collaborator bridges and the tunables of the sync
//! engine. It enforces fail-fast validation so a misconfigured engine never
//! starts.
//!
//! ## Required Dependencies
//!
//! - `LockService` - Serializes reconciliation and state transitions
//! - `AuditSink` - Receives the operation log
//! - `CredentialVault` - Decrypts provider secrets
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Clock` - Defaults to `SystemClock`
//!
//! When the `local-shims` feature is enabled, single-process defaults from
//! `bridge-local` are injected for the required bridges if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SyncSettings};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .lock_service(Arc::new(MyDistributedLocks::connect(..)?))
//!     .audit_sink(Arc::new(MyOperationLog::new(..)))
//!     .credential_vault(Arc::new(MyKms::new(..)))
//!     .sync_settings(SyncSettings::default().with_max_concurrent_syncs(8))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{AuditSink, Clock, CredentialVault, LockService, SystemClock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable prefix for [`SyncSettings::apply_overrides`].
pub const ENV_PREFIX: &str = "CLOUDSYNC_";

/// Tunables of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Account/provider sync tasks allowed to run at once; further tasks wait
    /// in `queuing`.
    pub max_concurrent_syncs: usize,

    /// Region sync tasks allowed to run at once across all providers.
    pub max_concurrent_region_syncs: usize,

    /// A non-idle entity whose last sync started longer ago than this is
    /// considered stuck and may be synced again without `force`.
    pub stale_sync_timeout_secs: u64,

    /// Upper bound for one whole task; `None` disables the bound.
    pub sync_timeout_secs: Option<u64>,

    /// Capacity of the event bus.
    pub event_buffer_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_syncs: 4,
            max_concurrent_region_syncs: 8,
            stale_sync_timeout_secs: 30 * 60,
            sync_timeout_secs: None,
            event_buffer_size: 100,
        }
    }
}

impl SyncSettings {
    pub fn with_max_concurrent_syncs(mut self, n: usize) -> Self {
        self.max_concurrent_syncs = n;
        self
    }

    pub fn with_max_concurrent_region_syncs(mut self, n: usize) -> Self {
        self.max_concurrent_region_syncs = n;
        self
    }

    pub fn with_stale_sync_timeout_secs(mut self, secs: u64) -> Self {
        self.stale_sync_timeout_secs = secs;
        self
    }

    pub fn with_sync_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.sync_timeout_secs = secs;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn stale_sync_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_sync_timeout_secs as i64)
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_secs.map(Duration::from_secs)
    }

    /// Override values from `CLOUDSYNC_*` environment variables.
    pub fn from_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override values from a key lookup (`CLOUDSYNC_MAX_CONCURRENT_SYNCS`,
    /// `CLOUDSYNC_MAX_CONCURRENT_REGION_SYNCS`, `CLOUDSYNC_STALE_SYNC_TIMEOUT_SECS`,
    /// `CLOUDSYNC_SYNC_TIMEOUT_SECS`, `CLOUDSYNC_EVENT_BUFFER_SIZE`).
    ///
    /// `CLOUDSYNC_SYNC_TIMEOUT_SECS=0` disables the task timeout.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, raw)))
        }

        let key = |name: &str| format!("{}{}", ENV_PREFIX, name);

        let name = key("MAX_CONCURRENT_SYNCS");
        if let Some(raw) = lookup(&name) {
            self.max_concurrent_syncs = parse(&name, raw)?;
        }
        let name = key("MAX_CONCURRENT_REGION_SYNCS");
        if let Some(raw) = lookup(&name) {
            self.max_concurrent_region_syncs = parse(&name, raw)?;
        }
        let name = key("STALE_SYNC_TIMEOUT_SECS");
        if let Some(raw) = lookup(&name) {
            self.stale_sync_timeout_secs = parse(&name, raw)?;
        }
        let name = key("SYNC_TIMEOUT_SECS");
        if let Some(raw) = lookup(&name) {
            let secs: u64 = parse(&name, raw)?;
            self.sync_timeout_secs = (secs > 0).then_some(secs);
        }
        let name = key("EVENT_BUFFER_SIZE");
        if let Some(raw) = lookup(&name) {
            self.event_buffer_size = parse(&name, raw)?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_syncs == 0 {
            return Err(Error::Config(
                "max_concurrent_syncs must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_region_syncs == 0 {
            return Err(Error::Config(
                "max_concurrent_region_syncs must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }

        if self.stale_sync_timeout_secs == 0 {
            return Err(Error::Config(
                "stale_sync_timeout_secs must be greater than 0; a zero timeout would \
                 let every request bypass admission control"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub lock_service: Arc<dyn LockService>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub credential_vault: Arc<dyn CredentialVault>,
    pub clock: Arc<dyn Clock>,
    pub sync: SyncSettings,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("lock_service", &"LockService { ... }")
            .field("audit_sink", &"AuditSink { ... }")
            .field("credential_vault", &"CredentialVault { ... }")
            .field("clock", &"Clock { ... }")
            .field("sync", &self.sync)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.validate()
    }
}

#[cfg(not(feature = "local-shims"))]
fn capability_missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required {}. \
             Single process: enable the 'local-shims' feature to use the bridge-local default. \
             Control plane: inject the host implementation.",
            capability, purpose
        ),
    }
}

#[cfg(feature = "local-shims")]
fn provide_default_lock_service() -> Result<Arc<dyn LockService>> {
    Ok(Arc::new(bridge_local::LocalLockManager::new()))
}

#[cfg(not(feature = "local-shims"))]
fn provide_default_lock_service() -> Result<Arc<dyn LockService>> {
    Err(capability_missing(
        "LockService",
        "to serialize reconciliation passes",
    ))
}

#[cfg(feature = "local-shims")]
fn provide_default_audit_sink() -> Result<Arc<dyn AuditSink>> {
    Ok(Arc::new(bridge_local::TracingAuditSink))
}

#[cfg(not(feature = "local-shims"))]
fn provide_default_audit_sink() -> Result<Arc<dyn AuditSink>> {
    Err(capability_missing("AuditSink", "to record the operation log"))
}

#[cfg(feature = "local-shims")]
fn provide_default_credential_vault() -> Result<Arc<dyn CredentialVault>> {
    Ok(Arc::new(bridge_local::Base64CredentialVault::new()))
}

#[cfg(not(feature = "local-shims"))]
fn provide_default_credential_vault() -> Result<Arc<dyn CredentialVault>> {
    Err(capability_missing(
        "CredentialVault",
        "to decrypt provider credentials",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    lock_service: Option<Arc<dyn LockService>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    credential_vault: Option<Arc<dyn CredentialVault>>,
    clock: Option<Arc<dyn Clock>>,
    sync: Option<SyncSettings>,
}

impl CoreConfigBuilder {
    pub fn lock_service(mut self, service: Arc<dyn LockService>) -> Self {
        self.lock_service = Some(service);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn credential_vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.credential_vault = Some(vault);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = Some(settings);
        self
    }

    /// Builds the configuration, filling defaults and validating.
    ///
    /// # Errors
    ///
    /// - `CapabilityMissing` when a required bridge is absent and the
    ///   `local-shims` feature is off
    /// - `Config` when a tunable is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let lock_service = match self.lock_service {
            Some(service) => service,
            None => provide_default_lock_service()?,
        };

        let audit_sink = match self.audit_sink {
            Some(sink) => sink,
            None => provide_default_audit_sink()?,
        };

        let credential_vault = match self.credential_vault {
            Some(vault) => vault,
            None => provide_default_credential_vault()?,
        };

        let config = CoreConfig {
            lock_service,
            audit_sink,
            credential_vault,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sync: self.sync.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{AuditEntry, LockGuard};
    use std::collections::HashMap;

    struct NoopLocks;

    #[async_trait]
    impl LockService for NoopLocks {
        async fn lock_object(&self, scope: &str, key: &str) -> BridgeResult<LockGuard> {
            Ok(LockGuard::new(scope, key, ()))
        }
    }

    struct NoopAudit;

    #[async_trait]
    impl AuditSink for NoopAudit {
        async fn log_event(&self, _entry: AuditEntry) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct PlainVault;

    #[async_trait]
    impl CredentialVault for PlainVault {
        async fn encrypt(&self, _owner_id: &str, plaintext: &str) -> BridgeResult<String> {
            Ok(plaintext.to_string())
        }

        async fn decrypt(&self, _owner_id: &str, ciphertext: &str) -> BridgeResult<String> {
            Ok(ciphertext.to_string())
        }
    }

    fn full_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .lock_service(Arc::new(NoopLocks))
            .audit_sink(Arc::new(NoopAudit))
            .credential_vault(Arc::new(PlainVault))
    }

    #[test]
    fn test_builder_with_all_bridges() {
        let config = full_builder().build().unwrap();
        assert_eq!(config.sync, SyncSettings::default());
    }

    #[cfg(not(feature = "local-shims"))]
    #[test]
    fn test_builder_requires_lock_service() {
        let result = CoreConfig::builder()
            .audit_sink(Arc::new(NoopAudit))
            .credential_vault(Arc::new(PlainVault))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "LockService")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other),
        }
    }

    #[cfg(feature = "local-shims")]
    #[test]
    fn test_builder_with_local_defaults() {
        let config = CoreConfig::builder().build().unwrap();
        assert_eq!(config.sync.max_concurrent_syncs, 4);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let result = full_builder()
            .sync_settings(SyncSettings::default().with_max_concurrent_syncs(0))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = full_builder()
            .sync_settings(SyncSettings::default().with_max_concurrent_region_syncs(0))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_stale_timeout() {
        let settings = SyncSettings::default().with_stale_sync_timeout_secs(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CLOUDSYNC_MAX_CONCURRENT_SYNCS", "2"),
            ("CLOUDSYNC_SYNC_TIMEOUT_SECS", "600"),
            ("CLOUDSYNC_EVENT_BUFFER_SIZE", " 256 "),
        ]
        .into_iter()
        .collect();

        let settings = SyncSettings::default()
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.max_concurrent_syncs, 2);
        assert_eq!(settings.max_concurrent_region_syncs, 8);
        assert_eq!(settings.sync_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(settings.event_buffer_size, 256);
    }

    #[test]
    fn test_zero_timeout_override_disables_timeout() {
        let settings = SyncSettings::default()
            .with_sync_timeout_secs(Some(30))
            .apply_overrides(|key| {
                (key == "CLOUDSYNC_SYNC_TIMEOUT_SECS").then(|| "0".to_string())
            })
            .unwrap();
        assert_eq!(settings.sync_timeout(), None);
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let result = SyncSettings::default().apply_overrides(|key| {
            (key == "CLOUDSYNC_MAX_CONCURRENT_SYNCS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_config_debug_hides_bridges() {
        let config = full_builder().build().unwrap();
        let printed = format!("{:?}", config);
        assert!(printed.contains("LockService { ... }"));
        assert!(printed.contains("max_concurrent_syncs"));
    }
}
