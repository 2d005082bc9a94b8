//! Subscription lifecycle management
//!
//! Orchestrates subscribe / change-plan / cancel flows: validates against
//! stored state, talks to the payment gateway, then persists the outcome.
//! Validation rejects before any remote call, a gateway failure aborts
//! before anything is persisted, and a persistence failure after a
//! successful gateway call is logged with enough context to reconcile by
//! hand.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use quillbox_shared::TenantId;

use crate::catalog::{quota_for, resolve_plan, Tier};
use crate::error::{BillingError, BillingResult};
use crate::gateway::{CardOnFile, GatewayInvoice, PaymentGateway};
use crate::store::{DataStore, NewGroup, TenantRecord};
use crate::transition::{plan_transition, Transition};

/// Billing state summary for a tenant, shaped for display.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionOverview {
    pub tier: Tier,
    pub pending_tier: Tier,
    /// True while a scheduled downgrade has not been applied yet.
    pub transitioning: bool,
    pub period_end: Option<OffsetDateTime>,
    pub card: Option<CardOnFile>,
    pub seats: u64,
    /// Most recent charge failure message, present only while the tenant has
    /// unresolved failed payments.
    pub last_failure: Option<String>,
}

pub struct LifecycleManager<G, S> {
    gateway: G,
    store: S,
}

impl<G: PaymentGateway, S: DataStore> LifecycleManager<G, S> {
    pub fn new(gateway: G, store: S) -> Self {
        Self { gateway, store }
    }

    /// Subscribe a tenant to a paid plan for the first time.
    ///
    /// The idempotency key is persisted before the gateway call: if the
    /// client retries after a network failure, the stored key is reused and
    /// the gateway replays the original request instead of creating a second
    /// customer.
    pub async fn subscribe(
        &self,
        tenant_id: TenantId,
        card_token: &str,
        plan_id: &str,
    ) -> BillingResult<()> {
        let tier = resolve_plan(plan_id)
            .ok_or_else(|| BillingError::Conflict(format!("Unknown plan: {plan_id}")))?;

        let record = self.store.tenant(tenant_id).await?;
        // A tenant whose subscription ended at the gateway sits at Free with
        // a stale customer id; they subscribe fresh rather than change plan.
        if record.current_tier != Tier::Free {
            return Err(BillingError::Conflict(
                "tenant already has a subscription; change the plan instead".to_string(),
            ));
        }
        let contact = self.store.contact(tenant_id).await?;

        let candidate = Uuid::new_v4().to_string();
        let key = self
            .store
            .ensure_idempotency_key(tenant_id, &candidate)
            .await?;

        let created = self
            .gateway
            .create_customer(&contact.email, card_token, plan_id, &key)
            .await?;

        if let Err(e) = self
            .store
            .record_new_subscription(
                tenant_id,
                &created.customer_id,
                tier,
                quota_for(tier),
                created.period_end,
            )
            .await
        {
            tracing::error!(
                tenant_id = %tenant_id,
                customer_id = %created.customer_id,
                period_end = %created.period_end,
                error = %e,
                "Subscription created at gateway but local persist failed"
            );
            return Err(e);
        }

        if tier == Tier::Enterprise {
            self.ensure_group_record(tenant_id).await?;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            customer_id = %created.customer_id,
            tier = %tier,
            "Tenant subscribed"
        );
        Ok(())
    }

    /// Move a tenant between plans.
    ///
    /// Upgrades take effect immediately (prorated, invoiced when coming from
    /// a paid tier); downgrades are scheduled for the end of the current
    /// period. Returns the decided transition.
    pub async fn change_plan(
        &self,
        tenant_id: TenantId,
        plan_id: &str,
    ) -> BillingResult<Transition> {
        let requested = resolve_plan(plan_id)
            .ok_or_else(|| BillingError::Conflict(format!("Unknown plan: {plan_id}")))?;

        let record = self.store.tenant(tenant_id).await?;
        let customer_id = require_customer(&record)?;

        let transition = plan_transition(record.current_tier, requested)?;

        let period_end = self
            .gateway
            .update_subscription(&customer_id, plan_id, transition.prorate)
            .await?;

        if transition.invoice_now {
            self.gateway.invoice_now(&customer_id).await?;
        }

        let persisted = if transition.is_upgrade() {
            self.store
                .apply_upgrade(
                    tenant_id,
                    transition.effective_tier,
                    quota_for(transition.effective_tier),
                    period_end,
                )
                .await
        } else {
            self.store
                .schedule_downgrade(tenant_id, transition.pending_tier, period_end)
                .await
        };

        if let Err(e) = persisted {
            tracing::error!(
                tenant_id = %tenant_id,
                customer_id = %customer_id,
                from = %record.current_tier,
                to = %requested,
                period_end = %period_end,
                error = %e,
                "Plan changed at gateway but local persist failed"
            );
            return Err(e);
        }

        if transition.is_upgrade() && requested == Tier::Enterprise {
            self.ensure_group_record(tenant_id).await?;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            from = %record.current_tier,
            to = %requested,
            scheduled = transition.schedules_downgrade,
            "Plan change processed"
        );
        Ok(transition)
    }

    /// Cancel at period end. The tenant keeps their paid tier until the
    /// period runs out, then the sweep drops them to Free.
    pub async fn cancel(&self, tenant_id: TenantId) -> BillingResult<()> {
        let record = self.store.tenant(tenant_id).await?;
        let customer_id = require_customer(&record)?;

        self.gateway.cancel_at_period_end(&customer_id).await?;

        let period_end = match record.period_end {
            Some(end) => end,
            None => self.gateway.get_subscription(&customer_id).await?.period_end,
        };

        if let Err(e) = self
            .store
            .schedule_downgrade(tenant_id, Tier::Free, period_end)
            .await
        {
            tracing::error!(
                tenant_id = %tenant_id,
                customer_id = %customer_id,
                period_end = %period_end,
                error = %e,
                "Cancellation accepted at gateway but local persist failed"
            );
            return Err(e);
        }

        tracing::info!(
            tenant_id = %tenant_id,
            effective = %period_end,
            "Cancellation scheduled"
        );
        Ok(())
    }

    /// Replace the tenant's default payment source. The gateway retries any
    /// outstanding failed charges against the new card.
    pub async fn update_payment_method(
        &self,
        tenant_id: TenantId,
        card_token: &str,
    ) -> BillingResult<()> {
        let record = self.store.tenant(tenant_id).await?;
        let customer_id = require_customer(&record)?;

        self.gateway
            .update_default_source(&customer_id, card_token)
            .await?;

        tracing::info!(tenant_id = %tenant_id, "Payment method updated");
        Ok(())
    }

    /// Summarize the tenant's billing state for display.
    pub async fn subscription_overview(
        &self,
        tenant_id: TenantId,
    ) -> BillingResult<SubscriptionOverview> {
        let record = self.store.tenant(tenant_id).await?;

        let mut overview = SubscriptionOverview {
            tier: record.current_tier,
            pending_tier: record.pending_tier,
            transitioning: record.has_pending_downgrade(),
            period_end: record.period_end,
            card: None,
            seats: 0,
            last_failure: None,
        };

        let Some(customer_id) = record.gateway_customer_id.as_deref() else {
            return Ok(overview);
        };

        let snapshot = self.gateway.get_subscription(customer_id).await?;
        overview.period_end = Some(snapshot.period_end);
        overview.card = snapshot.card;
        overview.seats = snapshot.quantity;

        if record.failed_payment_count > 0 {
            overview.last_failure = self
                .store
                .latest_failure(tenant_id)
                .await?
                .and_then(|f| f.failure_message);
        }

        Ok(overview)
    }

    /// Invoice history from the gateway.
    pub async fn invoices(&self, tenant_id: TenantId) -> BillingResult<Vec<GatewayInvoice>> {
        let record = self.store.tenant(tenant_id).await?;
        let customer_id = require_customer(&record)?;
        self.gateway.invoices(&customer_id).await
    }

    /// Ensure the tenant's Enterprise group record exists.
    ///
    /// Reuses and re-activates an existing group; otherwise creates one with
    /// defaults derived from the contact and links it. Called on every
    /// Enterprise entry, so it has to be safe to repeat.
    pub async fn ensure_group_record(&self, tenant_id: TenantId) -> BillingResult<()> {
        let contact = self.store.contact(tenant_id).await?;

        if let Some(group_id) = contact.group_id {
            self.store
                .activate_group_member(tenant_id, group_id)
                .await?;
            tracing::debug!(
                tenant_id = %tenant_id,
                group_id = %group_id,
                "Reactivated existing group record"
            );
            return Ok(());
        }

        let name = contact.full_name();
        let group = NewGroup {
            contact: format!("{name} - {}", contact.email),
            address: contact.email.clone(),
            name,
            seats: 1,
        };
        let group_id = self.store.create_group(&group).await?;
        self.store.link_group(tenant_id, group_id).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            group_id = %group_id,
            "Created group record"
        );
        Ok(())
    }
}

fn require_customer(record: &TenantRecord) -> BillingResult<String> {
    record.gateway_customer_id.clone().ok_or_else(|| {
        BillingError::NotFound("tenant has no subscription on file".to_string())
    })
}
