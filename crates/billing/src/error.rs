//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// Tenant or gateway customer does not exist. Terminal and
    /// user-actionable.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested transition is a no-op or otherwise invalid for the
    /// tenant's current state. Terminal and user-actionable.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payment gateway failed. The message originates from the provider
    /// and is passed through verbatim; never retried automatically here.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// The data store failed. When this happens after a successful gateway
    /// call the caller logs it with full context for manual reconciliation.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::Gateway(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Persistence(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
