//! Merchant tenant domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use sigshield_core::{BillingProvider, Email, MerchantId, ShopDomain};

/// A merchant tenant (domain type).
///
/// At least one of `contact_email` and `shop_domain` is always set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merchant {
    /// Durable internal identifier.
    pub id: MerchantId,
    /// Identity on the direct channel.
    pub contact_email: Option<Email>,
    /// Identity on the app-store channel.
    pub shop_domain: Option<ShopDomain>,
    /// Monotonic: once true, never reset.
    pub onboarding_completed: bool,
    /// Provider that bills this merchant.
    pub billing_provider: BillingProvider,
    /// Subscription object at `billing_provider`, set only after a
    /// successful reconciliation.
    pub provider_subscription_ref: Option<String>,
    /// Shopify offline session id, or Stripe customer id.
    pub provider_session_ref: Option<String>,
    /// Subscription created at the provider but not yet approved.
    pub pending_subscription_ref: Option<String>,
    /// Where the merchant approves `pending_subscription_ref`.
    pub pending_confirmation_url: Option<String>,
    /// Informational only.
    pub has_password: bool,
    /// Informational only.
    pub email_login: Option<String>,
    /// When the merchant was created.
    pub created_at: DateTime<Utc>,
    /// When the merchant was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Merchant {
    /// Whether the stored linkage grants access to subscription-required paths.
    ///
    /// A pending subscription never counts.
    #[must_use]
    pub const fn has_active_subscription(&self) -> bool {
        self.provider_subscription_ref.is_some()
            && !matches!(self.billing_provider, BillingProvider::None)
    }

    /// Provider this merchant is, or would be, billed through.
    ///
    /// Falls back to the identity channel when no provider has been selected
    /// yet: shops bill through the app store, everyone else directly.
    #[must_use]
    pub const fn effective_provider(&self) -> BillingProvider {
        match self.billing_provider {
            BillingProvider::None if self.shop_domain.is_some() => BillingProvider::AppStore,
            BillingProvider::None => BillingProvider::DirectPay,
            provider => provider,
        }
    }

    /// Linked subscription reference, if it belongs to `provider`.
    #[must_use]
    pub fn linked_ref_for(&self, provider: BillingProvider) -> Option<&str> {
        if self.billing_provider == provider {
            self.provider_subscription_ref.as_deref()
        } else {
            None
        }
    }

    /// Pending subscription reference, if it belongs to `provider`.
    #[must_use]
    pub fn pending_ref_for(&self, provider: BillingProvider) -> Option<&str> {
        if self.billing_provider == provider {
            self.pending_subscription_ref.as_deref()
        } else {
            None
        }
    }
}

/// Identity captured on first resolution, used to create or refresh a merchant.
#[derive(Debug, Clone)]
pub enum NewMerchant {
    /// Completed Shopify install handshake.
    AppStore {
        /// Installing shop.
        shop_domain: ShopDomain,
        /// Offline session id saved by the install callback.
        session_ref: String,
    },
    /// Verified direct-signup session.
    Direct {
        /// Verified contact email.
        email: Email,
        /// Whether the account has a password credential.
        has_password: bool,
        /// Login identifier reported by the auth provider.
        email_login: Option<String>,
    },
}

/// Non-sensitive merchant fields returned by `GET /api/merchant`.
#[derive(Debug, Clone, Serialize)]
pub struct MerchantView {
    pub id: MerchantId,
    pub contact_email: Option<Email>,
    pub shop_domain: Option<ShopDomain>,
    pub onboarding_completed: bool,
    pub billing_provider: BillingProvider,
    pub subscription_active: bool,
    pub subscription_pending: bool,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Merchant> for MerchantView {
    fn from(merchant: &Merchant) -> Self {
        Self {
            id: merchant.id,
            contact_email: merchant.contact_email.clone(),
            shop_domain: merchant.shop_domain.clone(),
            onboarding_completed: merchant.onboarding_completed,
            billing_provider: merchant.billing_provider,
            subscription_active: merchant.has_active_subscription(),
            subscription_pending: merchant.pending_subscription_ref.is_some(),
            has_password: merchant.has_password,
            created_at: merchant.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn merchant() -> Merchant {
        let now = Utc::now();
        Merchant {
            id: MerchantId::new(1),
            contact_email: None,
            shop_domain: Some(ShopDomain::parse("acme.myshopify.com").unwrap()),
            onboarding_completed: true,
            billing_provider: BillingProvider::None,
            provider_subscription_ref: None,
            provider_session_ref: None,
            pending_subscription_ref: None,
            pending_confirmation_url: None,
            has_password: false,
            email_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_pending_subscription_is_not_active() {
        let mut m = merchant();
        m.billing_provider = BillingProvider::AppStore;
        m.pending_subscription_ref = Some("gid://shopify/AppSubscription/1".to_string());
        assert!(!m.has_active_subscription());

        m.provider_subscription_ref = m.pending_subscription_ref.take();
        assert!(m.has_active_subscription());
    }

    #[test]
    fn test_effective_provider_follows_channel_until_selected() {
        let mut m = merchant();
        assert_eq!(m.effective_provider(), BillingProvider::AppStore);

        m.shop_domain = None;
        m.contact_email = Some(Email::parse("ops@acme.example").unwrap());
        assert_eq!(m.effective_provider(), BillingProvider::DirectPay);

        m.billing_provider = BillingProvider::AppStore;
        assert_eq!(m.effective_provider(), BillingProvider::AppStore);
    }

    #[test]
    fn test_linked_ref_is_scoped_to_provider() {
        let mut m = merchant();
        m.billing_provider = BillingProvider::DirectPay;
        m.provider_subscription_ref = Some("sub_123".to_string());
        assert_eq!(m.linked_ref_for(BillingProvider::DirectPay), Some("sub_123"));
        assert_eq!(m.linked_ref_for(BillingProvider::AppStore), None);
    }

    #[test]
    fn test_view_hides_provider_refs() {
        let mut m = merchant();
        m.billing_provider = BillingProvider::AppStore;
        m.provider_subscription_ref = Some("gid://shopify/AppSubscription/9".to_string());
        m.provider_session_ref = Some("offline_acme.myshopify.com".to_string());

        let json = serde_json::to_string(&MerchantView::from(&m)).unwrap();
        assert!(json.contains("\"subscription_active\":true"));
        assert!(!json.contains("AppSubscription"));
        assert!(!json.contains("offline_"));
    }
}
