//! Persistence interface for tenant billing state
//!
//! The lifecycle manager, webhook reconciler, and downgrade sweep only touch
//! storage through [`DataStore`]. The Postgres implementation lives in
//! [`crate::pg`]; tests substitute an in-memory store.

use serde::Serialize;
use time::OffsetDateTime;

use quillbox_shared::{GroupId, TenantId};

use crate::catalog::Tier;
use crate::error::BillingResult;

/// A tenant's billing row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TenantRecord {
    pub id: TenantId,
    /// Gateway customer ID; `None` until the tenant first subscribes.
    pub gateway_customer_id: Option<String>,
    pub current_tier: Tier,
    /// Tier the tenant lands on at period end. Equals `current_tier` unless
    /// a downgrade is scheduled.
    pub pending_tier: Tier,
    pub period_end: Option<OffsetDateTime>,
    /// Set exactly when `pending_tier != current_tier`.
    pub pending_downgrade_at: Option<OffsetDateTime>,
    pub failed_payment_count: i32,
    pub quota: i64,
}

impl TenantRecord {
    /// A downgrade is scheduled iff the pending tier diverges.
    pub fn has_pending_downgrade(&self) -> bool {
        self.pending_tier != self.current_tier
    }
}

/// Contact details kept alongside the billing row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Contact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub group_id: Option<GroupId>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A recorded charge failure from the gateway. Append-only.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentFailure {
    pub event_id: String,
    pub tenant_id: TenantId,
    pub invoice_id: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub occurred_at: OffsetDateTime,
}

/// Enterprise group record created on first Enterprise entry.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub address: String,
    pub contact: String,
    pub seats: i64,
}

/// Storage operations for the billing lifecycle.
#[allow(async_fn_in_trait)]
pub trait DataStore: Send + Sync {
    /// Fetch a tenant's billing row.
    async fn tenant(&self, tenant_id: TenantId) -> BillingResult<TenantRecord>;

    /// Resolve a gateway customer ID back to a tenant, if any.
    async fn tenant_by_customer(&self, customer_id: &str) -> BillingResult<Option<TenantRecord>>;

    /// Fetch a tenant's contact details.
    async fn contact(&self, tenant_id: TenantId) -> BillingResult<Contact>;

    /// Return the tenant's stored subscribe idempotency key, creating and
    /// persisting `candidate` if none exists yet. The stored key always wins
    /// so a retried subscribe replays the original gateway request.
    async fn ensure_idempotency_key(
        &self,
        tenant_id: TenantId,
        candidate: &str,
    ) -> BillingResult<String>;

    /// Record a successful first subscription: customer ID, tier, quota,
    /// period end. Clears the stored idempotency key and any pending
    /// downgrade.
    async fn record_new_subscription(
        &self,
        tenant_id: TenantId,
        customer_id: &str,
        tier: Tier,
        quota: Option<i64>,
        period_end: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Apply an immediate plan change: both current and pending tier move to
    /// `tier`, quota is replaced, and any scheduled downgrade is cleared.
    async fn apply_upgrade(
        &self,
        tenant_id: TenantId,
        tier: Tier,
        quota: Option<i64>,
        period_end: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Schedule a downgrade to `tier` at `at`, refreshing the period end to
    /// the same instant. Current tier and quota are untouched until the
    /// sweep applies it.
    async fn schedule_downgrade(
        &self,
        tenant_id: TenantId,
        tier: Tier,
        at: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Clear all subscription state back to Free: tiers, period end, pending
    /// downgrade, and failure count.
    async fn clear_subscription(&self, tenant_id: TenantId) -> BillingResult<()>;

    /// Bump the failed payment counter. Returns the new count.
    async fn increment_failed_payments(&self, tenant_id: TenantId) -> BillingResult<i32>;

    /// Reset the failure counter and refresh the period end after a
    /// successful payment.
    async fn mark_payment_succeeded(
        &self,
        tenant_id: TenantId,
        period_end: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Record a charge failure keyed by gateway event ID. Returns `false`
    /// when the event was already recorded.
    async fn insert_payment_failure(&self, failure: &PaymentFailure) -> BillingResult<bool>;

    /// Claim a gateway event for processing. Returns `false` when another
    /// delivery already claimed it.
    async fn claim_event(&self, event_id: &str, kind: &str) -> BillingResult<bool>;

    /// Give a claim back after processing failed, so the gateway's
    /// redelivery can re-apply the event instead of landing as a duplicate.
    async fn release_event(&self, event_id: &str) -> BillingResult<()>;

    /// Drop processed event claims older than `cutoff`. Returns how many
    /// rows were removed. The cutoff must sit well past the gateway's
    /// redelivery window, or a late duplicate would re-apply.
    async fn purge_processed_events(&self, cutoff: OffsetDateTime) -> BillingResult<u64>;

    /// Most recent recorded payment failure for a tenant, if any.
    async fn latest_failure(&self, tenant_id: TenantId)
        -> BillingResult<Option<PaymentFailure>>;

    /// Apply every due scheduled downgrade in one statement. Returns how
    /// many tenants moved.
    async fn apply_due_downgrades(&self, now: OffsetDateTime) -> BillingResult<u64>;

    /// Create a group record and return its ID.
    async fn create_group(&self, group: &NewGroup) -> BillingResult<GroupId>;

    /// Point a tenant's contact at a group.
    async fn link_group(&self, tenant_id: TenantId, group_id: GroupId) -> BillingResult<()>;

    /// Re-activate a tenant's membership in an existing group.
    async fn activate_group_member(
        &self,
        tenant_id: TenantId,
        group_id: GroupId,
    ) -> BillingResult<()>;
}
