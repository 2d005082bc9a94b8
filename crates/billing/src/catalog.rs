//! Plan catalog
//!
//! Static mapping from externally-facing plan identifiers to internal tier
//! codes and document quotas. Intentionally a fixed table, not computed, so
//! tier semantics stay auditable.

use serde::{Deserialize, Serialize};

/// Monthly document quota for the Personal tier.
pub const PERSONAL_QUOTA: i64 = 15;
/// Monthly document quota for the Team tier.
pub const TEAM_QUOTA: i64 = 75;

/// Subscription tier for billing.
///
/// The discriminants are the codes stored in the database. Enterprise carries
/// the historical code 5; ordering still follows plan value
/// (Free < Personal < Team < Enterprise).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free = 0,
    Personal = 1,
    Team = 2,
    Enterprise = 5,
}

impl Default for Tier {
    fn default() -> Self {
        Self::Free
    }
}

impl Tier {
    /// Database/tier code for this tier.
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Personal => "personal",
            Tier::Team => "team",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolve an externally-facing plan identifier to a tier.
///
/// Unrecognized identifiers resolve to `None`, the no-op sentinel: callers
/// treat such plans as invalid input rather than guessing a tier.
pub fn resolve_plan(plan_id: &str) -> Option<Tier> {
    match plan_id {
        "101" => Some(Tier::Personal),
        "102" => Some(Tier::Team),
        "103" => Some(Tier::Enterprise),
        _ => None,
    }
}

/// Document quota for a tier.
///
/// Free has no paid quota and Enterprise is governed by seats rather than a
/// numeric cap, so both return `None`.
pub fn quota_for(tier: Tier) -> Option<i64> {
    match tier {
        Tier::Personal => Some(PERSONAL_QUOTA),
        Tier::Team => Some(TEAM_QUOTA),
        Tier::Free | Tier::Enterprise => None,
    }
}
