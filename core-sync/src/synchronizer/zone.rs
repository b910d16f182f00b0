//! Zones of one region.

use async_trait::async_trait;
use bridge_traits::cloud::RemoteZone;
use bridge_traits::persistence::RecordStore;
use core_inventory::models::{new_id, Cloudregion, Zone};
use core_inventory::Inventory;

use super::ResourceSync;
use crate::error::{Result, SyncError};

pub struct ZoneSync {
    inventory: Inventory,
    region: Cloudregion,
}

impl ZoneSync {
    pub fn new(inventory: Inventory, region: Cloudregion) -> Self {
        Self { inventory, region }
    }
}

#[async_trait]
impl ResourceSync for ZoneSync {
    type Local = Zone;
    type Remote = RemoteZone;

    fn store(&self) -> &dyn RecordStore<Zone> {
        self.inventory.zones.as_ref()
    }

    fn parent_id(&self) -> &str {
        &self.region.id
    }

    async fn list_locals(&self) -> Result<Vec<Zone>> {
        Ok(self.inventory.zones_of_region(&self.region.id).await?)
    }

    fn local_key(&self, local: &Zone) -> Option<String> {
        local.external_id.clone()
    }

    fn remote_key(&self, remote: &RemoteZone) -> Option<String> {
        Some(remote.global_id.clone())
    }

    fn remote_name<'a>(&self, remote: &'a RemoteZone) -> &'a str {
        &remote.name
    }

    async fn check_delete(&self, local: &Zone) -> Result<()> {
        let hosts = self.inventory.host_count_in_zone(&local.id).await?;
        if hosts > 0 {
            return Err(SyncError::invalid_status(
                "zone",
                &local.id,
                "in use",
                format!("{} host(s) still reference the zone", hosts),
            ));
        }
        Ok(())
    }

    fn apply_remote(&self, local: &mut Zone, remote: &RemoteZone) {
        local.status = remote.status.clone();
        local.is_emulated = remote.is_emulated;
        local.cloudregion_id = self.region.id.clone();
        local.i18n = remote.i18n.clone();
    }

    fn create_local(&self, remote: &RemoteZone, name: String) -> Zone {
        Zone {
            id: new_id(),
            name,
            external_id: Some(remote.global_id.clone()),
            cloudregion_id: self.region.id.clone(),
            status: remote.status.clone(),
            is_emulated: remote.is_emulated,
            i18n: remote.i18n.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::reconciler;
    use super::super::ReconcileOptions;
    use super::*;
    use bridge_traits::audit::AuditAction;
    use core_inventory::models::Host;

    fn region() -> Cloudregion {
        Cloudregion {
            id: "r1".to_string(),
            name: "hangzhou".to_string(),
            external_id: Some("aliyun/cn-hangzhou".to_string()),
            provider: "aliyun".to_string(),
            status: "inservice".to_string(),
            is_emulated: false,
            i18n: Default::default(),
        }
    }

    fn local(id: &str, name: &str, external_id: &str) -> Zone {
        Zone {
            id: id.to_string(),
            name: name.to_string(),
            external_id: Some(external_id.to_string()),
            cloudregion_id: "r1".to_string(),
            status: "enable".to_string(),
            is_emulated: false,
            i18n: Default::default(),
        }
    }

    fn remote(global_id: &str, name: &str) -> RemoteZone {
        RemoteZone {
            global_id: global_id.to_string(),
            name: name.to_string(),
            status: "enable".to_string(),
            i18n: Default::default(),
            is_emulated: false,
        }
    }

    async fn seeded() -> Inventory {
        let inventory = Inventory::in_memory();
        inventory.regions.insert(region()).await.unwrap();
        inventory.zones.insert(local("zA", "zoneA", "z1")).await.unwrap();
        inventory.zones.insert(local("zB", "zoneB", "z2")).await.unwrap();
        inventory
    }

    #[tokio::test]
    async fn test_update_add_and_guarded_delete() {
        let inventory = seeded().await;
        inventory
            .hosts
            .insert(Host {
                id: "h1".to_string(),
                name: "web-1".to_string(),
                external_id: None,
                zone_id: "zB".to_string(),
                manager_id: None,
                status: "running".to_string(),
            })
            .await
            .unwrap();
        let (reconciler, audit) = reconciler();
        let sync = ZoneSync::new(inventory.clone(), region());

        let outcome = reconciler
            .reconcile(
                &sync,
                vec![remote("z1", "Zone-A2"), remote("z3", "new")],
                ReconcileOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.result.updated, 1);
        assert_eq!(outcome.result.added, 1);
        assert_eq!(outcome.result.deleted, 0);
        assert_eq!(outcome.result.delete_errors, 1);
        assert_eq!(outcome.pairs.len(), 2);

        assert_eq!(inventory.zones.fetch_by_id("zA").await.unwrap().name, "Zone-A2");
        assert!(inventory.zones.find_by_id("zB").await.unwrap().is_some());
        let zones = inventory.zones_of_region("r1").await.unwrap();
        assert!(zones.iter().any(|z| z.name == "new" && z.external_id.as_deref() == Some("z3")));

        assert_eq!(audit.count_action(AuditAction::SyncUpdate).await, 1);
        assert_eq!(audit.count_action(AuditAction::Create).await, 1);
        assert_eq!(audit.count_action(AuditAction::SyncDelete).await, 0);
    }

    #[tokio::test]
    async fn test_second_pass_is_unchanged() {
        let inventory = seeded().await;
        let (reconciler, _audit) = reconciler();
        let sync = ZoneSync::new(inventory.clone(), region());
        let remotes = || vec![remote("z1", "Zone-A2"), remote("z3", "new")];

        let first = reconciler
            .reconcile(&sync, remotes(), ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(first.result.deleted, 1);

        let second = reconciler
            .reconcile(&sync, remotes(), ReconcileOptions::default())
            .await
            .unwrap();
        assert!(second.result.is_unchanged());
        assert_eq!(second.result.error_count(), 0);
        assert_eq!(inventory.zones_of_region("r1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_name_collision_gets_suffix_and_is_kept() {
        let inventory = seeded().await;
        let (reconciler, _audit) = reconciler();
        let sync = ZoneSync::new(inventory.clone(), region());
        let remotes = || {
            vec![
                remote("z1", "zoneA"),
                remote("z2", "zoneB"),
                remote("z4", "zoneA"),
            ]
        };

        let outcome = reconciler
            .reconcile(&sync, remotes(), ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.result.added, 1);
        let added = outcome
            .locals()
            .find(|z| z.external_id.as_deref() == Some("z4"))
            .unwrap();
        assert_ne!(added.name, "zoneA");
        assert!(added.name.starts_with("zoneA"));

        let again = reconciler
            .reconcile(&sync, remotes(), ReconcileOptions::default())
            .await
            .unwrap();
        assert!(again.result.is_unchanged());
    }

    #[tokio::test]
    async fn test_rename_onto_used_name_stays_unique() {
        let inventory = seeded().await;
        let (reconciler, _audit) = reconciler();
        let sync = ZoneSync::new(inventory.clone(), region());

        let outcome = reconciler
            .reconcile(
                &sync,
                vec![remote("z1", "zoneA"), remote("z2", "zoneA")],
                ReconcileOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.result.updated, 1);
        assert_eq!(inventory.zones.fetch_by_id("zA").await.unwrap().name, "zoneA");
        assert_eq!(inventory.zones.fetch_by_id("zB").await.unwrap().name, "zoneA-1");

        // Once the name is free again the remote name wins
        inventory.zones.delete("zA").await.unwrap();
        reconciler
            .reconcile(&sync, vec![remote("z2", "zoneA")], ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(inventory.zones.fetch_by_id("zB").await.unwrap().name, "zoneA");
    }

    #[tokio::test]
    async fn test_empty_listing_keeps_locals_unless_mass_delete_allowed() {
        let inventory = seeded().await;
        let (reconciler, _audit) = reconciler();
        let sync = ZoneSync::new(inventory.clone(), region());

        let outcome = reconciler
            .reconcile(&sync, Vec::new(), ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.result.deleted, 0);
        assert_eq!(inventory.zones_of_region("r1").await.unwrap().len(), 2);

        let outcome = reconciler
            .reconcile(
                &sync,
                Vec::new(),
                ReconcileOptions {
                    allow_mass_delete: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.result.deleted, 2);
        assert!(inventory.zones_of_region("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_remote_aborts_before_mutation() {
        let inventory = seeded().await;
        let (reconciler, audit) = reconciler();
        let sync = ZoneSync::new(inventory.clone(), region());

        let err = reconciler
            .reconcile(
                &sync,
                vec![remote("z1", "renamed"), remote("", "broken")],
                ReconcileOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Comparison(_)));
        assert_eq!(inventory.zones.fetch_by_id("zA").await.unwrap().name, "zoneA");
        assert_eq!(audit.entries().await.len(), 0);
    }
}
