//! Tier transition engine
//!
//! Pure decision logic for plan changes. Given the tenant's current tier and
//! the tier they asked for, decides whether the gateway charge is prorated,
//! whether an incremental invoice is raised immediately, and what the
//! persisted state should become.
//!
//! Upgrades and downgrades have asymmetric business meaning: an upgrade must
//! be paid for immediately (prorated invoice), while a downgrade is honored
//! only at the end of the period the tenant has already paid for.

use crate::catalog::Tier;
use crate::error::{BillingError, BillingResult};

/// Outcome of a tier transition decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Pass-through to the gateway: charge/credit the partial remainder of
    /// the billing period.
    pub prorate: bool,
    /// Raise an invoice for the prorated difference right now. Only set for
    /// paid-to-paid upgrades; a tenant coming from Free has no existing
    /// subscription to invoice against.
    pub invoice_now: bool,
    /// Tier to persist as `current_tier` immediately. Equals the requested
    /// tier on upgrades; stays at the current tier on downgrades so the
    /// tenant keeps the benefits they paid for.
    pub effective_tier: Tier,
    /// Tier to persist as `pending_tier`. Always the requested tier.
    pub pending_tier: Tier,
    /// Whether `pending_downgrade_at` should be set to the new period end
    /// (downgrades) instead of cleared (upgrades).
    pub schedules_downgrade: bool,
}

impl Transition {
    pub fn is_upgrade(&self) -> bool {
        !self.schedules_downgrade
    }

    fn upgrade(to: Tier, invoice_now: bool) -> Self {
        Self {
            prorate: true,
            invoice_now,
            effective_tier: to,
            pending_tier: to,
            schedules_downgrade: false,
        }
    }

    fn downgrade(from: Tier, to: Tier) -> Self {
        Self {
            prorate: false,
            invoice_now: false,
            effective_tier: from,
            pending_tier: to,
            schedules_downgrade: true,
        }
    }
}

/// Decide the transition for `(current, requested)`.
///
/// Every pair is enumerated explicitly so each branch is testable in
/// isolation. Requesting the tier the tenant is already on is a conflict;
/// callers surface it to the user.
pub fn plan_transition(current: Tier, requested: Tier) -> BillingResult<Transition> {
    use Tier::*;

    if current == requested {
        return Err(BillingError::Conflict(
            "tenant is already subscribed to that plan".to_string(),
        ));
    }

    let transition = match (current, requested) {
        // From Free every move is an upgrade, but there is no existing paid
        // subscription to invoice incrementally.
        (Free, Personal) | (Free, Team) | (Free, Enterprise) => {
            Transition::upgrade(requested, false)
        }

        // Personal only moves up among the paid plans.
        (Personal, Team) | (Personal, Enterprise) => Transition::upgrade(requested, true),
        (Personal, Free) => Transition::downgrade(current, requested),

        // Team goes up to Enterprise or down to Personal/Free.
        (Team, Enterprise) => Transition::upgrade(requested, true),
        (Team, Personal) | (Team, Free) => Transition::downgrade(current, requested),

        // From Enterprise every move is a downgrade.
        (Enterprise, _) => Transition::downgrade(current, requested),

        // Equal pairs were rejected above.
        _ => {
            return Err(BillingError::Conflict(format!(
                "no transition from {current} to {requested}"
            )))
        }
    };

    Ok(transition)
}
