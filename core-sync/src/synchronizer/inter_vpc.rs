//! Inter-VPC networks of one provider.

use async_trait::async_trait;
use bridge_traits::cloud::RemoteInterVpcNetwork;
use bridge_traits::persistence::{Filter, RecordStore};
use core_inventory::models::{new_id, Cloudprovider, InterVpcNetwork};
use core_inventory::Inventory;
use std::collections::HashMap;
use std::sync::Arc;

use super::ResourceSync;
use crate::error::Result;
use crate::project_mapping::ProjectMapping;

pub struct InterVpcNetworkSync {
    inventory: Inventory,
    provider: Cloudprovider,
    mapping: Option<Arc<ProjectMapping>>,
    /// VPC external id -> local VPC id, for the provider's VPCs.
    vpc_ids: HashMap<String, String>,
}

impl InterVpcNetworkSync {
    pub async fn load(
        inventory: Inventory,
        provider: Cloudprovider,
        mapping: Option<Arc<ProjectMapping>>,
    ) -> Result<Self> {
        let vpc_ids = inventory
            .vpcs
            .list(&Filter::new().equals("manager_id", &provider.id))
            .await?
            .into_iter()
            .filter_map(|vpc| vpc.external_id.map(|external| (external, vpc.id)))
            .collect();
        Ok(Self {
            inventory,
            provider,
            mapping,
            vpc_ids,
        })
    }

    /// Local ids of the member VPCs we know about, in remote order.
    fn member_ids(&self, remote: &RemoteInterVpcNetwork) -> Vec<String> {
        remote
            .vpc_ids
            .iter()
            .filter_map(|global_id| self.vpc_ids.get(global_id).cloned())
            .collect()
    }

    fn mapped_project(&self, name: &str) -> Option<String> {
        self.mapping
            .as_ref()
            .filter(|mapping| mapping.enable_resource_sync)
            .and_then(|mapping| mapping.project_for(name))
            .map(str::to_string)
    }
}

#[async_trait]
impl ResourceSync for InterVpcNetworkSync {
    type Local = InterVpcNetwork;
    type Remote = RemoteInterVpcNetwork;

    fn store(&self) -> &dyn RecordStore<InterVpcNetwork> {
        self.inventory.inter_vpc_networks.as_ref()
    }

    fn parent_id(&self) -> &str {
        &self.provider.id
    }

    async fn list_locals(&self) -> Result<Vec<InterVpcNetwork>> {
        Ok(self
            .inventory
            .inter_vpc_networks
            .list(&Filter::new().equals("manager_id", &self.provider.id))
            .await?)
    }

    fn local_key(&self, local: &InterVpcNetwork) -> Option<String> {
        local.external_id.clone()
    }

    fn remote_key(&self, remote: &RemoteInterVpcNetwork) -> Option<String> {
        Some(remote.global_id.clone())
    }

    fn remote_name<'a>(&self, remote: &'a RemoteInterVpcNetwork) -> &'a str {
        &remote.name
    }

    fn apply_remote(&self, local: &mut InterVpcNetwork, remote: &RemoteInterVpcNetwork) {
        local.status = remote.status.clone();
        local.vpc_ids = self.member_ids(remote);
        if let Some(project) = self.mapped_project(&remote.name) {
            local.project_id = project;
        }
    }

    fn create_local(&self, remote: &RemoteInterVpcNetwork, name: String) -> InterVpcNetwork {
        InterVpcNetwork {
            id: new_id(),
            name,
            external_id: Some(remote.global_id.clone()),
            manager_id: self.provider.id.clone(),
            status: remote.status.clone(),
            vpc_ids: self.member_ids(remote),
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
    use core_inventory::models::{Cloudaccount, Vpc};

    fn vpc(id: &str, external: &str, provider: &Cloudprovider) -> Vpc {
        Vpc {
            id: id.to_string(),
            name: id.to_string(),
            external_id: Some(external.to_string()),
            cloudregion_id: "r1".to_string(),
            manager_id: provider.id.clone(),
            status: "available".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            is_default: false,
            is_emulated: false,
            project_id: provider.project_id.clone(),
        }
    }

    #[tokio::test]
    async fn test_member_vpcs_resolve_to_local_ids() {
        let inventory = Inventory::in_memory();
        let account = Cloudaccount::new("acc", "aliyun");
        let provider = Cloudprovider::new(&account, "prod");
        inventory.vpcs.insert(vpc("l1", "vpc-a", &provider)).await.unwrap();
        inventory.vpcs.insert(vpc("l2", "vpc-b", &provider)).await.unwrap();

        let (reconciler, _audit) = reconciler();
        let sync = InterVpcNetworkSync::load(inventory.clone(), provider.clone(), None)
            .await
            .unwrap();
        let remote = RemoteInterVpcNetwork {
            global_id: "cen-1".to_string(),
            name: "mesh".to_string(),
            status: "available".to_string(),
            vpc_ids: vec!["vpc-b".to_string(), "vpc-unknown".to_string(), "vpc-a".to_string()],
        };

        let outcome = reconciler
            .reconcile(&sync, vec![remote.clone()], ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.result.added, 1);
        let network = outcome.locals().next().unwrap();
        assert_eq!(network.vpc_ids, vec!["l2".to_string(), "l1".to_string()]);
        assert_eq!(network.manager_id, provider.id);

        let again = reconciler
            .reconcile(&sync, vec![remote], ReconcileOptions::default())
            .await
            .unwrap();
        assert!(again.result.is_unchanged());
    }
}
