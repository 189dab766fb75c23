//! Path to access-tier mapping.

use sigshield_core::AccessTier;

/// Where merchants finish onboarding.
pub const ONBOARDING_PATH: &str = "/onboarding";
/// Where merchants set up billing.
pub const BILLING_PATH: &str = "/billing";
/// Where unauthenticated browsers are sent.
pub const LOGIN_PATH: &str = "/auth/login";
/// Home of the app once a merchant has access.
pub const APP_PATH: &str = "/app";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Exact(&'static str),
    /// Matches the path itself and anything below it.
    Prefix(&'static str),
}

impl Pattern {
    fn matches(self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Prefix(prefix) => {
                path == prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

/// Ordered path rules. The first match wins; unmatched paths require a
/// subscription.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    rules: Vec<(Pattern, AccessTier)>,
}

impl AccessPolicy {
    /// Tier for `path`. Ignores any query string.
    #[must_use]
    pub fn tier_for(&self, path: &str) -> AccessTier {
        let path = path.split(['?', '#']).next().unwrap_or_default();

        // Never let traversal segments reach a permissive prefix
        if path.split('/').any(|segment| segment == "." || segment == "..") {
            return AccessTier::SubscriptionRequired;
        }

        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map_or(AccessTier::SubscriptionRequired, |(_, tier)| *tier)
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        use AccessTier::{Authenticated, OnboardingRequired, Public, SubscriptionRequired};
        use Pattern::{Exact, Prefix};

        Self {
            rules: vec![
                (Exact("/health"), Public),
                (Exact("/health/ready"), Public),
                (Exact("/api/access/check"), Public),
                (Prefix("/auth"), Public),
                (Prefix("/webhooks"), Public),
                (Exact("/api/merchant"), Authenticated),
                (Prefix("/api/onboarding"), Authenticated),
                (Exact(ONBOARDING_PATH), Authenticated),
                (Exact(BILLING_PATH), OnboardingRequired),
                (Exact("/billing/confirm"), OnboardingRequired),
                (Exact("/api/billing/subscribe"), OnboardingRequired),
                (Exact("/api/billing/status"), OnboardingRequired),
                (Exact("/api/billing/manage"), SubscriptionRequired),
            ],
        }
    }
}
