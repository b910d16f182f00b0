//! Provider connectivity and health bookkeeping.

use bridge_traits::audit::{AuditAction, AuditEntry};
use bridge_traits::persistence::Record;
use core_inventory::models::{Cloudprovider, HealthStatus, ProviderStatus};
use serde_json::json;
use tracing::{info, warn};

use super::SyncContext;
use crate::error::Result;

/// Record that the provider answered. Returns the current provider row.
pub(crate) async fn mark_connected(ctx: &SyncContext, provider: &Cloudprovider) -> Result<Cloudprovider> {
    if provider.status == ProviderStatus::Connected && provider.health_status == HealthStatus::Normal {
        return Ok(provider.clone());
    }
    set_health(ctx, &provider.id, ProviderStatus::Connected, HealthStatus::Normal, None).await
}

/// Record that the provider could not be reached or refused our credentials.
pub(crate) async fn mark_disconnected(ctx: &SyncContext, provider_id: &str, reason: &str) {
    warn!(provider_id, reason, "Provider unreachable");
    if let Err(e) = set_health(
        ctx,
        provider_id,
        ProviderStatus::Disconnected,
        HealthStatus::Unknown,
        Some(reason),
    )
    .await
    {
        warn!(provider_id, error = %e, "Failed to record provider health");
    }
}

async fn set_health(
    ctx: &SyncContext,
    provider_id: &str,
    status: ProviderStatus,
    health: HealthStatus,
    reason: Option<&str>,
) -> Result<Cloudprovider> {
    let _guard = ctx
        .locks
        .lock_object(Cloudprovider::KEYWORD, provider_id)
        .await?;
    let updated = ctx
        .inventory
        .providers
        .update(
            provider_id,
            Box::new(move |p: &mut Cloudprovider| {
                p.status = status;
                p.health_status = health;
            }),
        )
        .await?;

    let (before, after) = (&updated.before, &updated.after);
    if before.status != after.status || before.health_status != after.health_status {
        info!(provider_id, status = after.status.as_str(), "Provider health changed");
        let mut entry = AuditEntry::new(
            Cloudprovider::KEYWORD,
            &after.id,
            &after.name,
            AuditAction::HealthUpdate,
        )
        .with_notes(json!({
            "status": { "old": before.status.as_str(), "new": after.status.as_str() },
            "health_status": { "old": before.health_status, "new": after.health_status },
            "reason": reason,
        }));
        if status == ProviderStatus::Disconnected {
            entry = entry.failed();
        }
        ctx.audit(entry).await;
    }
    Ok(updated.after)
}
