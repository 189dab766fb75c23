//! Onboarding and subscription checks.

use sigshield_core::{AccessDecision, AccessTier, BillingProvider};

use crate::error::AppError;
use crate::identity::Principal;
use crate::models::Merchant;

/// Decides whether a principal may access a tier.
///
/// Reads only the principal snapshot and which providers this server has
/// configured, so equal inputs always produce equal decisions.
#[derive(Debug, Clone, Copy)]
pub struct AccessGate {
    app_store_enabled: bool,
    direct_pay_enabled: bool,
}

impl AccessGate {
    #[must_use]
    pub const fn new(app_store_enabled: bool, direct_pay_enabled: bool) -> Self {
        Self {
            app_store_enabled,
            direct_pay_enabled,
        }
    }

    const fn provider_configured(self, provider: BillingProvider) -> bool {
        match provider {
            BillingProvider::AppStore => self.app_store_enabled,
            BillingProvider::DirectPay => self.direct_pay_enabled,
            BillingProvider::None => false,
        }
    }

    /// Decision for `principal` on a path of `tier`.
    ///
    /// Onboarding is checked before billing, so a new merchant is never sent
    /// to pay before finishing setup.
    #[must_use]
    pub const fn evaluate(self, tier: AccessTier, principal: &Principal) -> AccessDecision {
        if matches!(tier, AccessTier::Public) {
            return AccessDecision::Allow;
        }

        let Principal::Merchant { merchant, .. } = principal else {
            return AccessDecision::RejectUnauthenticated;
        };

        if matches!(tier, AccessTier::Authenticated) {
            return AccessDecision::Allow;
        }
        if !merchant.onboarding_completed {
            return AccessDecision::RedirectOnboarding;
        }
        if matches!(tier, AccessTier::OnboardingRequired) {
            return AccessDecision::Allow;
        }

        if !self.provider_configured(merchant.effective_provider()) {
            return AccessDecision::RejectConfigError;
        }
        if !merchant.has_active_subscription() {
            return AccessDecision::RedirectBilling;
        }
        AccessDecision::Allow
    }

    /// Guard for handlers that need a subscribed merchant.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` for anonymous callers
    /// - `OnboardingRequired` / `SubscriptionRequired` when a step is missing
    /// - `Config` when the merchant's provider is not configured here
    pub fn require_subscription(self, principal: &Principal) -> Result<&Merchant, AppError> {
        match self.evaluate(AccessTier::SubscriptionRequired, principal) {
            AccessDecision::Allow => principal
                .merchant()
                .ok_or_else(|| AppError::Unauthorized("No merchant session".to_string())),
            AccessDecision::RejectUnauthenticated => {
                Err(AppError::Unauthorized("No merchant session".to_string()))
            }
            AccessDecision::RedirectOnboarding => Err(AppError::OnboardingRequired),
            AccessDecision::RedirectBilling => Err(AppError::SubscriptionRequired),
            AccessDecision::RejectConfigError => Err(AppError::Config(
                "billing provider is not configured".to_string(),
            )),
        }
    }
}
