//! Access tiers and decisions.

use serde::{Deserialize, Serialize};

/// Minimum access level a request path demands.
///
/// Ordered from least to most restrictive, so `tier >= AccessTier::Authenticated`
/// reads as "authenticated or higher".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    /// Anyone may access.
    Public,
    /// Any resolved merchant may access.
    Authenticated,
    /// The merchant must have completed onboarding.
    OnboardingRequired,
    /// The merchant must be onboarded and hold an active subscription.
    SubscriptionRequired,
}

/// Outcome of evaluating an [`AccessTier`] against a request's principal.
///
/// Computed per request and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    /// Let the request through.
    Allow,
    /// Send the merchant to finish onboarding.
    RedirectOnboarding,
    /// Send the merchant to set up billing.
    RedirectBilling,
    /// No merchant could be identified.
    RejectUnauthenticated,
    /// Server configuration cannot support the check.
    RejectConfigError,
}

impl AccessDecision {
    /// Whether the request may proceed.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}
