// Billing crate clippy configuration
#![allow(clippy::field_reassign_with_default)] // Used for conditional struct field setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Quillbox Billing
//!
//! Tenant subscription lifecycle against Stripe.
//!
//! ## Features
//!
//! - **Lifecycle**: Subscribe, change plan, cancel with tier-aware proration
//! - **Scheduled Downgrades**: Downgrades honored at period end via a sweep
//! - **Webhook Reconciliation**: Lookup-verified gateway events folded into
//!   local state, idempotent per event id
//! - **Enterprise Groups**: Group record upsert on Enterprise entry

pub mod catalog;
pub mod client;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod notify;
pub mod pg;
pub mod reconcile;
pub mod store;
pub mod transition;
pub mod webhook;


pub use catalog::{quota_for, resolve_plan, Tier, PERSONAL_QUOTA, TEAM_QUOTA};
pub use client::{PriceIds, StripeConfig, StripeGateway};
pub use error::{BillingError, BillingResult};
pub use gateway::{
    CardOnFile, EventKind, GatewayEvent, GatewayInvoice, GatewayLineItem, NewCustomer,
    PaymentGateway, SubscriptionSnapshot,
};
pub use lifecycle::{LifecycleManager, SubscriptionOverview};
pub use notify::{LogNotifier, Notifier};
pub use pg::PgStore;
pub use reconcile::{run_downgrade_sweep, run_event_cleanup};
pub use store::{Contact, DataStore, NewGroup, PaymentFailure, TenantRecord};
pub use transition::{plan_transition, Transition};
pub use webhook::{WebhookOutcome, WebhookReconciler};
