//! External projects (remote tenants) of one provider.

use async_trait::async_trait;
use bridge_traits::cloud::RemoteProject;
use bridge_traits::persistence::{Filter, RecordStore};
use core_inventory::models::{new_id, Cloudprovider, ExternalProject};
use core_inventory::Inventory;
use std::sync::Arc;

use super::ResourceSync;
use crate::error::Result;
use crate::project_mapping::ProjectMapping;

pub struct ExternalProjectSync {
    inventory: Inventory,
    provider: Cloudprovider,
    mapping: Option<Arc<ProjectMapping>>,
}

impl ExternalProjectSync {
    pub fn new(
        inventory: Inventory,
        provider: Cloudprovider,
        mapping: Option<Arc<ProjectMapping>>,
    ) -> Self {
        Self {
            inventory,
            provider,
            mapping,
        }
    }

    fn mapped_project(&self, name: &str) -> Option<String> {
        self.mapping
            .as_ref()
            .filter(|mapping| mapping.enable_project_sync)
            .and_then(|mapping| mapping.project_for(name))
            .map(str::to_string)
    }
}

#[async_trait]
impl ResourceSync for ExternalProjectSync {
    type Local = ExternalProject;
    type Remote = RemoteProject;

    fn store(&self) -> &dyn RecordStore<ExternalProject> {
        self.inventory.external_projects.as_ref()
    }

    fn parent_id(&self) -> &str {
        &self.provider.id
    }

    async fn list_locals(&self) -> Result<Vec<ExternalProject>> {
        Ok(self
            .inventory
            .external_projects
            .list(&Filter::new().equals("manager_id", &self.provider.id))
            .await?)
    }

    fn local_key(&self, local: &ExternalProject) -> Option<String> {
        local.external_id.clone()
    }

    fn remote_key(&self, remote: &RemoteProject) -> Option<String> {
        Some(remote.global_id.clone())
    }

    fn remote_name<'a>(&self, remote: &'a RemoteProject) -> &'a str {
        &remote.name
    }

    fn apply_remote(&self, local: &mut ExternalProject, remote: &RemoteProject) {
        local.status = remote.status.clone();
        if let Some(project) = self.mapped_project(&remote.name) {
            local.project_id = project;
        }
    }

    fn create_local(&self, remote: &RemoteProject, name: String) -> ExternalProject {
        ExternalProject {
            id: new_id(),
            name,
            external_id: Some(remote.global_id.clone()),
            manager_id: self.provider.id.clone(),
            status: remote.status.clone(),
            project_id: self
                .mapped_project(&remote.name)
                .unwrap_or_else(|| self.provider.project_id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::reconciler;
    use super::super::ReconcileOptions;
    use super::*;
    use crate::project_mapping::MappingSource;
    use core_inventory::models::{Cloudaccount, ProjectMappingRule, ProjectRule};

    #[tokio::test]
    async fn test_projects_follow_mapping_only_with_project_sync() {
        let inventory = Inventory::in_memory();
        let account = Cloudaccount::new("acc", "aliyun");
        let provider = Cloudprovider::new(&account, "prod");
        let mut mapping = ProjectMapping {
            provider_id: provider.id.clone(),
            account_id: account.id.clone(),
            source: MappingSource::Account,
            rule: ProjectMappingRule {
                id: "m1".to_string(),
                name: "m1".to_string(),
                enabled: true,
                rules: vec![ProjectRule {
                    name_prefix: None,
                    project_id: "tenant-a".to_string(),
                }],
            },
            enable_project_sync: false,
            enable_resource_sync: true,
        };
        let remote = RemoteProject {
            global_id: "p-1".to_string(),
            name: "billing".to_string(),
            status: "available".to_string(),
        };
        let (reconciler, _audit) = reconciler();

        let sync = ExternalProjectSync::new(
            inventory.clone(),
            provider.clone(),
            Some(Arc::new(mapping.clone())),
        );
        let outcome = reconciler
            .reconcile(&sync, vec![remote.clone()], ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.locals().next().unwrap().project_id, provider.project_id);

        mapping.enable_project_sync = true;
        let sync = ExternalProjectSync::new(inventory.clone(), provider, Some(Arc::new(mapping)));
        let outcome = reconciler
            .reconcile(&sync, vec![remote], ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.result.updated, 1);
        assert_eq!(outcome.locals().next().unwrap().project_id, "tenant-a");
    }
}
