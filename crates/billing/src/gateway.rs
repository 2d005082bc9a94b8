//! Payment gateway interface
//!
//! The lifecycle manager and webhook reconciler consume the remote billing
//! provider only through this trait. The production implementation lives in
//! [`crate::client`]; tests substitute an in-memory mock.

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// A freshly created remote customer + subscription.
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub customer_id: String,
    pub period_end: OffsetDateTime,
}

/// Card on file for a customer.
#[derive(Debug, Clone, Serialize)]
pub struct CardOnFile {
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
}

/// Authoritative subscription data fetched from the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSnapshot {
    pub period_end: OffsetDateTime,
    pub card: Option<CardOnFile>,
    /// Seat quantity on the subscription item.
    pub quantity: u64,
}

/// An invoice as reported by the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayInvoice {
    pub id: String,
    pub total: i64,
    pub amount_due: i64,
    pub date: OffsetDateTime,
    pub paid: bool,
    pub lines: Vec<GatewayLineItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayLineItem {
    pub id: String,
    pub amount: i64,
    pub proration: bool,
    pub description: Option<String>,
    pub plan: Option<String>,
}

/// Kind of a gateway webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The remote subscription ended (`customer.subscription.deleted`).
    SubscriptionDeleted,
    /// A charge attempt failed (`charge.failed`).
    ChargeFailed,
    /// An invoice was paid (`invoice.payment_succeeded`).
    PaymentSucceeded,
    /// Anything else; ignored but logged for forward compatibility.
    Other(String),
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::SubscriptionDeleted => write!(f, "customer.subscription.deleted"),
            EventKind::ChargeFailed => write!(f, "charge.failed"),
            EventKind::PaymentSucceeded => write!(f, "invoice.payment_succeeded"),
            EventKind::Other(kind) => write!(f, "{kind}"),
        }
    }
}

/// A gateway event that has already been verified (fetched back from the
/// gateway by id, never parsed from the raw transport payload).
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub id: String,
    pub kind: EventKind,
    pub customer_id: Option<String>,
    pub created: OffsetDateTime,
    pub invoice_id: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

/// Remote billing provider operations.
///
/// All calls are bounded-timeout network calls; a failure maps to
/// [`crate::BillingError::Gateway`] and callers persist nothing afterward.
#[allow(async_fn_in_trait)]
pub trait PaymentGateway: Send + Sync {
    /// Create a customer with a default card and subscribe them to a plan.
    ///
    /// `idempotency_key` is persisted by the caller before the first attempt
    /// and reused on retry so a client retry cannot create a second remote
    /// subscription.
    async fn create_customer(
        &self,
        email: &str,
        card_token: &str,
        plan_id: &str,
        idempotency_key: &str,
    ) -> BillingResult<NewCustomer>;

    /// Move the customer's subscription to a different plan, prorating when
    /// asked to. Returns the new period end.
    async fn update_subscription(
        &self,
        customer_id: &str,
        plan_id: &str,
        prorate: bool,
    ) -> BillingResult<OffsetDateTime>;

    /// Let the subscription lapse at the end of the current period.
    async fn cancel_at_period_end(&self, customer_id: &str) -> BillingResult<()>;

    /// Invoice the customer immediately for any pending prorations.
    async fn invoice_now(&self, customer_id: &str) -> BillingResult<()>;

    /// Fetch the authoritative subscription snapshot.
    async fn get_subscription(&self, customer_id: &str) -> BillingResult<SubscriptionSnapshot>;

    /// Fetch the customer's invoice history.
    async fn invoices(&self, customer_id: &str) -> BillingResult<Vec<GatewayInvoice>>;

    /// Replace the customer's default payment source. The gateway retries
    /// previously failed charges against the new source.
    async fn update_default_source(&self, customer_id: &str, card_token: &str)
        -> BillingResult<()>;

    /// Fetch a webhook event back from the gateway by id. The lookup itself
    /// establishes authenticity; raw payloads are never trusted.
    async fn verified_event(&self, event_id: &str) -> BillingResult<GatewayEvent>;
}
