//! Named Object Locks
//!
//! Reconciliation of one parent scope, state transitions of one entity and
//! name generation for one resource type must each be serialized across every
//! worker of the deployment. The sync engine expresses this through
//! [`LockService`]; a single-process implementation lives in `bridge-local`,
//! multi-node deployments back it with a distributed lock manager.

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;

/// Held lock on `(scope, key)`. The lock is released when the guard drops.
pub struct LockGuard {
    scope: String,
    key: String,
    _release: Box<dyn Send + Sync>,
}

impl LockGuard {
    /// Wrap an implementation-specific handle whose `Drop` releases the lock.
    pub fn new(
        scope: impl Into<String>,
        key: impl Into<String>,
        release: impl Send + Sync + 'static,
    ) -> Self {
        Self {
            scope: scope.into(),
            key: key.into(),
            _release: Box::new(release),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release explicitly before the end of the enclosing scope.
    pub fn release(self) {}
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("scope", &self.scope)
            .field("key", &self.key)
            .finish()
    }
}

/// Named mutual exclusion.
///
/// Locks are not reentrant: a task must not request a `(scope, key)` pair it
/// already holds.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Wait until `(scope, key)` is free and take it.
    async fn lock_object(&self, scope: &str, key: &str) -> Result<LockGuard>;
}
