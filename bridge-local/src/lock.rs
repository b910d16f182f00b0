//! In-process named locks

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    lock::{LockGuard, LockService},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Entries beyond this count trigger a sweep of idle lock slots.
const PRUNE_THRESHOLD: usize = 1024;

type LockTable = HashMap<(String, String), Arc<Mutex<()>>>;

/// `LockService` backed by one Tokio mutex per `(scope, key)`.
///
/// Only serializes tasks inside this process. Deployments running several
/// workers need a distributed implementation.
#[derive(Default)]
pub struct LocalLockManager {
    table: Mutex<LockTable>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lock slots currently tracked.
    pub async fn slot_count(&self) -> usize {
        self.table.lock().await.len()
    }

    fn prune(table: &mut LockTable) {
        // A slot only referenced by the table is neither held nor awaited.
        table.retain(|_, slot| Arc::strong_count(slot) > 1);
    }
}

#[async_trait]
impl LockService for LocalLockManager {
    async fn lock_object(&self, scope: &str, key: &str) -> Result<LockGuard> {
        let slot = {
            let mut table = self.table.lock().await;
            if table.len() > PRUNE_THRESHOLD {
                Self::prune(&mut table);
            }
            table
                .entry((scope.to_string(), key.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        trace!(scope, key, "Waiting for object lock");
        let guard = slot.lock_owned().await;
        trace!(scope, key, "Acquired object lock");

        Ok(LockGuard::new(scope, key, guard))
    }
}
