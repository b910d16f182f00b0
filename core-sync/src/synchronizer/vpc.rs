//! VPCs of one provider in one region.

use async_trait::async_trait;
use bridge_traits::cloud::RemoteVpc;
use bridge_traits::persistence::{Filter, RecordStore};
use core_inventory::models::{new_id, Cloudprovider, Cloudregion, Vpc};
use core_inventory::Inventory;
use std::sync::Arc;

use super::ResourceSync;
use crate::error::{Result, SyncError};
use crate::project_mapping::ProjectMapping;

pub struct VpcSync {
    inventory: Inventory,
    provider: Cloudprovider,
    region: Cloudregion,
    mapping: Option<Arc<ProjectMapping>>,
    parent: String,
}

impl VpcSync {
    pub fn new(
        inventory: Inventory,
        provider: Cloudprovider,
        region: Cloudregion,
        mapping: Option<Arc<ProjectMapping>>,
    ) -> Self {
        let parent = format!("{}/{}", provider.id, region.id);
        Self {
            inventory,
            provider,
            region,
            mapping,
            parent,
        }
    }

    /// Project assigned through the mapping, if resource mapping applies.
    fn mapped_project(&self, name: &str) -> Option<String> {
        self.mapping
            .as_ref()
            .filter(|mapping| mapping.enable_resource_sync)
            .and_then(|mapping| mapping.project_for(name))
            .map(str::to_string)
    }
}

#[async_trait]
impl ResourceSync for VpcSync {
    type Local = Vpc;
    type Remote = RemoteVpc;

    fn store(&self) -> &dyn RecordStore<Vpc> {
        self.inventory.vpcs.as_ref()
    }

    fn parent_id(&self) -> &str {
        &self.parent
    }

    async fn list_locals(&self) -> Result<Vec<Vpc>> {
        Ok(self.inventory.vpcs_of(&self.provider.id, &self.region.id).await?)
    }

    fn local_key(&self, local: &Vpc) -> Option<String> {
        local.external_id.clone()
    }

    fn remote_key(&self, remote: &RemoteVpc) -> Option<String> {
        Some(remote.global_id.clone())
    }

    fn remote_name<'a>(&self, remote: &'a RemoteVpc) -> &'a str {
        &remote.name
    }

    async fn check_delete(&self, local: &Vpc) -> Result<()> {
        let networks = self
            .inventory
            .inter_vpc_networks
            .list(&Filter::new().equals("manager_id", &self.provider.id))
            .await?;
        if let Some(network) = networks.iter().find(|n| n.vpc_ids.contains(&local.id)) {
            return Err(SyncError::invalid_status(
                "vpc",
                &local.id,
                "in use",
                format!("member of inter-VPC network {}", network.name),
            ));
        }
        Ok(())
    }

    fn apply_remote(&self, local: &mut Vpc, remote: &RemoteVpc) {
        local.status = remote.status.clone();
        local.cidr_block = remote.cidr_block.clone();
        local.is_default = remote.is_default;
        local.is_emulated = remote.is_emulated;
        if let Some(project) = self.mapped_project(&remote.name) {
            local.project_id = project;
        }
    }

    fn create_local(&self, remote: &RemoteVpc, name: String) -> Vpc {
        Vpc {
            id: new_id(),
            name,
            external_id: Some(remote.global_id.clone()),
            cloudregion_id: self.region.id.clone(),
            manager_id: self.provider.id.clone(),
            status: remote.status.clone(),
            cidr_block: remote.cidr_block.clone(),
            is_default: remote.is_default,
            is_emulated: remote.is_emulated,
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
    use core_inventory::models::{
        Cloudaccount, InterVpcNetwork, ProjectMappingRule, ProjectRule,
    };

    fn fixture() -> (Cloudprovider, Cloudregion) {
        let account = Cloudaccount::new("acc", "aliyun");
        let provider = Cloudprovider::new(&account, "prod");
        let mut region = Cloudregion::default_region();
        region.id = "r1".to_string();
        (provider, region)
    }

    fn remote(global_id: &str, name: &str, cidr: &str) -> RemoteVpc {
        RemoteVpc {
            global_id: global_id.to_string(),
            name: name.to_string(),
            status: "available".to_string(),
            cidr_block: cidr.to_string(),
            is_default: false,
            is_emulated: false,
        }
    }

    fn mapping(provider: &Cloudprovider) -> Arc<ProjectMapping> {
        Arc::new(ProjectMapping {
            provider_id: provider.id.clone(),
            account_id: provider.cloudaccount_id.clone(),
            source: MappingSource::Provider,
            rule: ProjectMappingRule {
                id: "m1".to_string(),
                name: "m1".to_string(),
                enabled: true,
                rules: vec![ProjectRule {
                    name_prefix: Some("prod-".to_string()),
                    project_id: "production".to_string(),
                }],
            },
            enable_project_sync: false,
            enable_resource_sync: true,
        })
    }

    #[tokio::test]
    async fn test_new_vpcs_get_mapped_or_provider_project() {
        let inventory = Inventory::in_memory();
        let (provider, region) = fixture();
        let (reconciler, _audit) = reconciler();
        let sync = VpcSync::new(
            inventory.clone(),
            provider.clone(),
            region.clone(),
            Some(mapping(&provider)),
        );

        let outcome = reconciler
            .reconcile(
                &sync,
                vec![
                    remote("v1", "prod-web", "10.0.0.0/16"),
                    remote("v2", "dev", "10.1.0.0/16"),
                ],
                ReconcileOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.result.added, 2);
        let vpcs = inventory.vpcs_of(&provider.id, &region.id).await.unwrap();
        let web = vpcs.iter().find(|v| v.name == "prod-web").unwrap();
        let dev = vpcs.iter().find(|v| v.name == "dev").unwrap();
        assert_eq!(web.project_id, "production");
        assert_eq!(dev.project_id, provider.project_id);
    }

    #[tokio::test]
    async fn test_vpc_in_inter_vpc_network_is_not_deleted() {
        let inventory = Inventory::in_memory();
        let (provider, region) = fixture();
        let (reconciler, _audit) = reconciler();
        let sync = VpcSync::new(inventory.clone(), provider.clone(), region.clone(), None);

        let outcome = reconciler
            .reconcile(
                &sync,
                vec![
                    remote("v1", "a", "10.0.0.0/16"),
                    remote("v2", "b", "10.1.0.0/16"),
                ],
                ReconcileOptions::default(),
            )
            .await
            .unwrap();
        let member = outcome
            .locals()
            .find(|v| v.external_id.as_deref() == Some("v1"))
            .unwrap()
            .clone();
        inventory
            .inter_vpc_networks
            .insert(InterVpcNetwork {
                id: "n1".to_string(),
                name: "mesh".to_string(),
                external_id: Some("cen-1".to_string()),
                manager_id: provider.id.clone(),
                status: "available".to_string(),
                vpc_ids: vec![member.id.clone()],
                project_id: provider.project_id.clone(),
            })
            .await
            .unwrap();

        let outcome = reconciler
            .reconcile(
                &sync,
                vec![remote("v3", "c", "10.2.0.0/16")],
                ReconcileOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.result.deleted, 1);
        assert_eq!(outcome.result.delete_errors, 1);
        assert!(inventory.vpcs.find_by_id(&member.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cidr_change_is_one_update() {
        let inventory = Inventory::in_memory();
        let (provider, region) = fixture();
        let (reconciler, audit) = reconciler();
        let sync = VpcSync::new(inventory.clone(), provider, region, None);

        reconciler
            .reconcile(&sync, vec![remote("v1", "a", "10.0.0.0/16")], ReconcileOptions::default())
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile(&sync, vec![remote("v1", "a", "10.9.0.0/16")], ReconcileOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.result.updated, 1);
        let entry = audit
            .entries()
            .await
            .into_iter()
            .find(|e| e.action == bridge_traits::audit::AuditAction::SyncUpdate)
            .unwrap();
        assert!(entry.notes.to_string().contains("cidr_block"));
    }
}
