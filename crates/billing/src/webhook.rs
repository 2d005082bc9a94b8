//! Gateway webhook reconciliation
//!
//! The transport hands us nothing but an event id. The reconciler fetches
//! the event back from the gateway (the lookup is the authenticity check),
//! claims the id so a duplicate delivery becomes a no-op, and folds the
//! event into local tenant state.
//!
//! Webhook handling never returns an error for conditions the sender cannot
//! fix: duplicates and unknown customers are logged and acknowledged so the
//! gateway stops redelivering.

use crate::error::BillingResult;
use crate::gateway::{EventKind, GatewayEvent, PaymentGateway};
use crate::notify::Notifier;
use crate::store::{DataStore, PaymentFailure, TenantRecord};

/// What the reconciler did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event applied to tenant state.
    Processed,
    /// Already claimed by an earlier delivery.
    Duplicate,
    /// Verified but not actionable (unknown customer or uninteresting kind).
    Ignored,
}

pub struct WebhookReconciler<G, S, N> {
    gateway: G,
    store: S,
    notifier: N,
}

impl<G: PaymentGateway, S: DataStore, N: Notifier> WebhookReconciler<G, S, N> {
    pub fn new(gateway: G, store: S, notifier: N) -> Self {
        Self {
            gateway,
            store,
            notifier,
        }
    }

    /// Process one webhook delivery identified by `event_id`.
    ///
    /// The claim is taken before the handlers run so a racing duplicate
    /// cannot apply the event twice, and released again if a handler fails
    /// so the gateway's redelivery gets a fresh attempt rather than a
    /// duplicate skip.
    pub async fn process(&self, event_id: &str) -> BillingResult<WebhookOutcome> {
        let event = self.gateway.verified_event(event_id).await?;

        if !self
            .store
            .claim_event(&event.id, &event.kind.to_string())
            .await?
        {
            tracing::info!(event_id = %event.id, "Duplicate webhook delivery, skipping");
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.apply(&event).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(release_err) = self.store.release_event(&event.id).await {
                    tracing::error!(
                        event_id = %event.id,
                        error = %release_err,
                        "Failed to release event claim; redelivery will be dropped"
                    );
                }
                Err(err)
            }
        }
    }

    async fn apply(&self, event: &GatewayEvent) -> BillingResult<WebhookOutcome> {
        if let EventKind::Other(kind) = &event.kind {
            tracing::debug!(event_id = %event.id, kind = %kind, "Ignoring event kind");
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(record) = self.resolve_tenant(event).await? else {
            return Ok(WebhookOutcome::Ignored);
        };

        match event.kind {
            EventKind::SubscriptionDeleted => {
                self.handle_subscription_deleted(&record).await?;
            }
            EventKind::ChargeFailed => {
                self.handle_charge_failed(&record, event).await?;
            }
            EventKind::PaymentSucceeded => {
                self.handle_payment_succeeded(&record).await?;
            }
            EventKind::Other(_) => unreachable!("filtered above"),
        }

        Ok(WebhookOutcome::Processed)
    }

    async fn resolve_tenant(&self, event: &GatewayEvent) -> BillingResult<Option<TenantRecord>> {
        let Some(customer_id) = event.customer_id.as_deref() else {
            tracing::warn!(event_id = %event.id, "Event carries no customer, ignoring");
            return Ok(None);
        };

        let record = self.store.tenant_by_customer(customer_id).await?;
        if record.is_none() {
            // Deliveries can arrive for customers this deployment never
            // created (shared gateway account). Acknowledge, don't error.
            tracing::warn!(
                event_id = %event.id,
                customer_id = %customer_id,
                "Event for unknown customer, ignoring"
            );
        }
        Ok(record)
    }

    /// The remote subscription ended: drop the tenant to Free outright and
    /// clear every piece of schedule state so the pending/schedule invariant
    /// holds.
    async fn handle_subscription_deleted(&self, record: &TenantRecord) -> BillingResult<()> {
        self.store.clear_subscription(record.id).await?;
        tracing::info!(
            tenant_id = %record.id,
            was = %record.current_tier,
            "Subscription ended at gateway, tenant reset to free"
        );
        Ok(())
    }

    /// Record the failure once (keyed by event id), and only count and
    /// notify when this delivery was the one that recorded it.
    async fn handle_charge_failed(
        &self,
        record: &TenantRecord,
        event: &GatewayEvent,
    ) -> BillingResult<()> {
        let failure = PaymentFailure {
            event_id: event.id.clone(),
            tenant_id: record.id,
            invoice_id: event.invoice_id.clone(),
            failure_code: event.failure_code.clone(),
            failure_message: event.failure_message.clone(),
            occurred_at: event.created,
        };

        if !self.store.insert_payment_failure(&failure).await? {
            tracing::info!(
                tenant_id = %record.id,
                event_id = %event.id,
                "Charge failure already recorded"
            );
            return Ok(());
        }

        let failed_count = self.store.increment_failed_payments(record.id).await?;
        tracing::warn!(
            tenant_id = %record.id,
            failed_count,
            code = failure.failure_code.as_deref().unwrap_or("unknown"),
            "Charge failed"
        );

        self.notifier
            .payment_failed(record.id, failure.failure_message.as_deref(), failed_count)
            .await?;
        Ok(())
    }

    /// A payment went through: reset the failure counter and refresh the
    /// period end from the authoritative gateway snapshot rather than
    /// trusting the event payload.
    async fn handle_payment_succeeded(&self, record: &TenantRecord) -> BillingResult<()> {
        // resolve_tenant matched on the customer id, so it is present.
        let Some(customer_id) = record.gateway_customer_id.as_deref() else {
            return Ok(());
        };
        let snapshot = self.gateway.get_subscription(customer_id).await?;

        self.store
            .mark_payment_succeeded(record.id, snapshot.period_end)
            .await?;

        tracing::info!(
            tenant_id = %record.id,
            period_end = %snapshot.period_end,
            "Payment succeeded, failure count reset"
        );
        Ok(())
    }
}
