//! # Project Mapping Cache
//!
//! Which project-mapping rule governs the resources of each provider.
//!
//! ## Overview
//!
//! A provider can carry its own mapping; otherwise it inherits the mapping
//! of its account. The cache holds one immutable snapshot for every provider
//! and swaps it wholesale on rebuild, so lookups never wait for a rebuild in
//! progress. A lookup for a provider the snapshot does not know triggers a
//! rebuild, which is how newly created providers appear.

use bridge_traits::persistence::Filter;
use core_inventory::models::{Cloudaccount, Cloudprovider, ProjectMappingRule};
use core_inventory::Inventory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// Level a mapping was attached at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    Provider,
    Account,
}

/// Effective mapping of one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMapping {
    pub provider_id: String,
    pub account_id: String,
    pub source: MappingSource,
    pub rule: ProjectMappingRule,
    /// Assign external projects through the rule.
    pub enable_project_sync: bool,
    /// Assign synced resources through the rule.
    pub enable_resource_sync: bool,
}

impl ProjectMapping {
    pub fn project_for(&self, resource_name: &str) -> Option<&str> {
        self.rule.resolve(resource_name)
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    by_provider: HashMap<String, Option<Arc<ProjectMapping>>>,
}

/// Explicit, process-wide mapping cache keyed by provider id.
pub struct ProjectMappingCache {
    inventory: Inventory,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl ProjectMappingCache {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory,
            snapshot: RwLock::new(None),
        }
    }

    async fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Effective mapping of `provider_id`, or `None` when neither the
    /// provider nor its account has an enabled mapping.
    pub async fn get(&self, provider_id: &str) -> Result<Option<Arc<ProjectMapping>>> {
        if let Some(snapshot) = self.current().await {
            if let Some(entry) = snapshot.by_provider.get(provider_id) {
                return Ok(entry.clone());
            }
        }

        debug!(provider_id, "Project mapping cache miss");
        let snapshot = self.rebuild().await?;
        Ok(snapshot.by_provider.get(provider_id).cloned().flatten())
    }

    /// Mappings of every provider under `account_id`.
    pub async fn get_for_account(&self, account_id: &str) -> Result<Vec<Arc<ProjectMapping>>> {
        let snapshot = match self.current().await {
            Some(snapshot) => snapshot,
            None => self.rebuild().await?,
        };

        Ok(snapshot
            .by_provider
            .values()
            .flatten()
            .filter(|mapping| mapping.account_id == account_id)
            .cloned()
            .collect())
    }

    /// Drop the snapshot; the next lookup rebuilds it.
    pub async fn invalidate(&self) {
        *self.snapshot.write().await = None;
    }

    /// Reload every mapping eagerly. Returns how many providers were mapped.
    pub async fn rebuild_all(&self) -> Result<usize> {
        let snapshot = self.rebuild().await?;
        Ok(snapshot.by_provider.values().flatten().count())
    }

    async fn rebuild(&self) -> Result<Arc<Snapshot>> {
        let accounts: HashMap<String, Cloudaccount> = self
            .inventory
            .accounts
            .list(&Filter::new())
            .await?
            .into_iter()
            .map(|account| (account.id.clone(), account))
            .collect();
        let rules: HashMap<String, ProjectMappingRule> = self
            .inventory
            .project_mappings
            .list(&Filter::new().is_true("enabled"))
            .await?
            .into_iter()
            .map(|rule| (rule.id.clone(), rule))
            .collect();
        let providers = self.inventory.providers.list(&Filter::new()).await?;

        let by_provider = providers
            .into_iter()
            .map(|provider| {
                let mapping = effective_mapping(&provider, accounts.get(&provider.cloudaccount_id), &rules);
                (provider.id, mapping.map(Arc::new))
            })
            .collect();

        let snapshot = Arc::new(Snapshot { by_provider });
        *self.snapshot.write().await = Some(Arc::clone(&snapshot));
        debug!(providers = snapshot.by_provider.len(), "Project mapping cache rebuilt");
        Ok(snapshot)
    }

    /// Local project a resource named `resource_name` of `provider` belongs to.
    ///
    /// Falls back to the provider's own project when resource mapping is off
    /// or no rule matches.
    pub async fn project_for_resource(
        &self,
        provider: &Cloudprovider,
        resource_name: &str,
    ) -> Result<String> {
        let mapped = self.get(&provider.id).await?.and_then(|mapping| {
            mapping
                .enable_resource_sync
                .then(|| mapping.project_for(resource_name).map(str::to_string))
                .flatten()
        });
        Ok(mapped.unwrap_or_else(|| provider.project_id.clone()))
    }
}

/// Provider mapping when it resolves to an enabled rule, else the account's.
fn effective_mapping(
    provider: &Cloudprovider,
    account: Option<&Cloudaccount>,
    rules: &HashMap<String, ProjectMappingRule>,
) -> Option<ProjectMapping> {
    let from_provider = provider
        .project_mapping_id
        .as_ref()
        .and_then(|id| rules.get(id))
        .map(|rule| ProjectMapping {
            provider_id: provider.id.clone(),
            account_id: provider.cloudaccount_id.clone(),
            source: MappingSource::Provider,
            rule: rule.clone(),
            enable_project_sync: provider.enable_project_sync,
            enable_resource_sync: provider.enable_resource_sync,
        });

    from_provider.or_else(|| {
        let account = account?;
        let rule = rules.get(account.project_mapping_id.as_ref()?)?;
        Some(ProjectMapping {
            provider_id: provider.id.clone(),
            account_id: account.id.clone(),
            source: MappingSource::Account,
            rule: rule.clone(),
            enable_project_sync: account.enable_project_sync,
            enable_resource_sync: account.enable_resource_sync,
        })
    })
}
