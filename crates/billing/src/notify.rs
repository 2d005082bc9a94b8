//! Tenant notifications
//!
//! The webhook reconciler tells tenants about failed charges through this
//! trait. Delivery (email, in-app) is wired in by the embedding service; the
//! default just logs.

use quillbox_shared::TenantId;

use crate::error::BillingResult;

#[allow(async_fn_in_trait)]
pub trait Notifier: Send + Sync {
    /// Tell the tenant a charge failed and how many attempts have failed so
    /// far.
    async fn payment_failed(
        &self,
        tenant_id: TenantId,
        failure_message: Option<&str>,
        failed_count: i32,
    ) -> BillingResult<()>;
}

/// Log-only notifier.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn payment_failed(
        &self,
        tenant_id: TenantId,
        failure_message: Option<&str>,
        failed_count: i32,
    ) -> BillingResult<()> {
        tracing::warn!(
            tenant_id = %tenant_id,
            failed_count,
            message = failure_message.unwrap_or("unknown"),
            "Payment failed notification"
        );
        Ok(())
    }
}
