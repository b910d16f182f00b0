//! Region preparation for one provider: capabilities, regions and bindings.

use bridge_traits::cloud::CloudDriver;
use bridge_traits::persistence::Record;
use core_inventory::models::{Cloudprovider, Cloudregion};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{health, SyncContext};
use crate::error::Result;
use crate::result::SyncResult;
use crate::scope::SyncScope;
use crate::synchronizer::{ensure_bindings, ensure_default_region, ReconcileOptions, RegionSync};

/// Connect a driver for the provider, tracking connectivity on its health.
pub(crate) async fn connect(ctx: &SyncContext, provider: &Cloudprovider) -> Result<Arc<dyn CloudDriver>> {
    match ctx.drivers.connect(provider).await {
        Ok(driver) => Ok(driver),
        Err(e) => {
            if e.is_connectivity_failure() {
                health::mark_disconnected(ctx, &provider.id, &e.to_string()).await;
            }
            Err(e)
        }
    }
}

/// Refresh capabilities, reconcile the provider's regions and make sure it
/// is bound to each of them. On-premise providers get the default region.
#[instrument(skip_all, fields(provider_id = %provider.id))]
pub(crate) async fn prepare_regions(
    ctx: &SyncContext,
    provider: &Cloudprovider,
    driver: &dyn CloudDriver,
    scope: &SyncScope,
) -> Result<SyncResult> {
    let provider = refresh_capabilities(ctx, provider, driver).await?;
    let provider = health::mark_connected(ctx, &provider).await?;

    if driver.is_on_premise() {
        let binding = ensure_default_region(&ctx.inventory, ctx.locks.as_ref(), &provider).await?;
        debug!(binding_id = %binding.id, "On-premise provider bound to default region");
        return Ok(SyncResult::new());
    }

    let remotes = driver.list_regions().await?;
    let sync = RegionSync::load(
        ctx.inventory.clone(),
        provider.clone(),
        driver.vendor(),
        driver.region_external_id_prefix(),
    )
    .await?;
    let outcome = ctx
        .reconciler
        .reconcile(
            &sync,
            remotes,
            ReconcileOptions {
                allow_mass_delete: scope.full_sync,
            },
        )
        .await?;

    let regions: Vec<Cloudregion> = outcome.locals().cloned().collect();
    let bindings = ensure_bindings(&ctx.inventory, ctx.locks.as_ref(), &provider, &regions).await?;
    debug!(regions = regions.len(), bindings = bindings.len(), "Regions prepared");
    Ok(outcome.result)
}

async fn refresh_capabilities(
    ctx: &SyncContext,
    provider: &Cloudprovider,
    driver: &dyn CloudDriver,
) -> Result<Cloudprovider> {
    let mut capabilities = driver.get_capabilities().await?;
    capabilities.sort();
    capabilities.dedup();
    if capabilities == provider.capabilities {
        return Ok(provider.clone());
    }

    let _guard = ctx
        .locks
        .lock_object(Cloudprovider::KEYWORD, &provider.id)
        .await?;
    debug!(?capabilities, "Provider capabilities changed");
    let updated = ctx
        .inventory
        .providers
        .update(
            &provider.id,
            Box::new(move |p: &mut Cloudprovider| p.capabilities = capabilities),
        )
        .await?;
    Ok(updated.after)
}
