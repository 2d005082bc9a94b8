//! Scheduled maintenance jobs
//!
//! The downgrade sweep promotes every tenant whose scheduled downgrade has
//! come due. The whole sweep is one predicate-qualified update, so
//! concurrent or repeated runs are harmless: a row that already moved no
//! longer matches the predicate.
//!
//! The event cleanup trims old webhook claims, which would otherwise grow
//! without bound (every verified delivery leaves a row).

use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::store::DataStore;

/// Apply all downgrades due at `now`. Returns how many tenants moved.
pub async fn run_downgrade_sweep<S: DataStore>(
    store: &S,
    now: OffsetDateTime,
) -> BillingResult<u64> {
    let applied = store.apply_due_downgrades(now).await?;
    if applied > 0 {
        tracing::info!(applied, "Downgrade sweep applied scheduled tier changes");
    } else {
        tracing::debug!("Downgrade sweep found nothing due");
    }
    Ok(applied)
}

/// Purge webhook event claims processed before `cutoff`. The caller picks a
/// cutoff comfortably past the gateway's redelivery window.
pub async fn run_event_cleanup<S: DataStore>(
    store: &S,
    cutoff: OffsetDateTime,
) -> BillingResult<u64> {
    let purged = store.purge_processed_events(cutoff).await?;
    if purged > 0 {
        tracing::info!(purged, "Cleaned up old gateway event claims");
    }
    Ok(purged)
}
