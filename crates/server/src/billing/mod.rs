//! Subscription billing through Shopify app subscriptions and Stripe.
//!
//! The [`reconciler::BillingReconciler`] owns every write to a merchant's
//! billing linkage. It talks to providers through the [`AppStoreApi`] and
//! [`DirectPayApi`] traits; [`shopify::ShopifyBilling`] and
//! [`stripe::StripeBilling`] are the production implementations.

pub mod locks;
pub mod reconciler;
pub mod shopify;
pub mod stripe;

use async_trait::async_trait;
use thiserror::Error;

use sigshield_core::{BillingProvider, Email, RemoteSubscriptionStatus, ShopDomain};

use crate::db::RepositoryError;
use crate::models::ShopSession;

pub use locks::ReconcileLocks;
pub use reconciler::{BillingReconciler, EnsureOutcome};

/// Errors returned by a billing provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure, timeout, rate limit or provider-side 5xx.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request for a reason the merchant must fix.
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The stored provider credential is no longer valid.
    #[error("provider credential rejected")]
    Unauthorized,

    /// The provider answered with something we could not interpret.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

/// Errors from billing reconciliation.
#[derive(Debug, Error)]
pub enum BillingError {
    /// No usable provider session or account for this merchant.
    #[error("no billing session for this merchant")]
    SessionMissing,

    /// Transient provider failure; safe to retry.
    #[error("billing provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider refused to create or read the subscription.
    #[error("billing provider rejected the request: {0}")]
    ProviderRejected(String),

    /// A provider subscription exists but could not be recorded locally.
    #[error("{provider} subscription {reference} was not recorded: {source}")]
    PersistenceFailure {
        /// Provider holding the unrecorded subscription.
        provider: BillingProvider,
        /// Provider-side reference of the unrecorded subscription.
        reference: String,
        /// Underlying store failure.
        #[source]
        source: RepositoryError,
    },

    /// The merchant's provider is not configured on this server.
    #[error("billing provider {0} is not configured")]
    NotConfigured(BillingProvider),

    /// The merchant already holds a subscription with another provider.
    #[error("merchant is already billed through {current}")]
    ProviderConflict {
        /// Provider of the linked subscription.
        current: BillingProvider,
    },

    /// Store failure before anything was created at the provider.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ProviderError> for BillingError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(msg) | ProviderError::InvalidResponse(msg) => {
                Self::ProviderUnavailable(msg)
            }
            ProviderError::Rejected(msg) => Self::ProviderRejected(msg),
            ProviderError::Unauthorized => Self::SessionMissing,
        }
    }
}

/// A subscription object just created at a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSubscription {
    /// Provider-side reference.
    pub reference: String,
    /// Where the merchant approves the charge, if approval is required.
    pub confirmation_url: Option<String>,
}

/// Shopify app subscription billing and install handshake.
#[async_trait]
pub trait AppStoreApi: Send + Sync {
    /// URL that starts the install handshake for `shop`.
    fn authorization_url(&self, shop: &ShopDomain, state: &str, redirect_uri: &str) -> String;

    /// Exchange an install callback code for an offline session.
    async fn exchange_code(
        &self,
        shop: &ShopDomain,
        code: &str,
    ) -> Result<ShopSession, ProviderError>;

    /// Reference of the shop's active subscription for this app, if any.
    async fn find_active_subscription(
        &self,
        session: &ShopSession,
    ) -> Result<Option<String>, ProviderError>;

    /// Status of a specific subscription.
    async fn subscription_status(
        &self,
        session: &ShopSession,
        reference: &str,
    ) -> Result<RemoteSubscriptionStatus, ProviderError>;

    /// Create the configured recurring plan.
    ///
    /// Shopify always returns a confirmation URL the merchant must visit.
    async fn create_subscription(
        &self,
        session: &ShopSession,
        return_url: &str,
    ) -> Result<CreatedSubscription, ProviderError>;

    /// Admin page where the merchant manages their plan.
    fn manage_url(&self, shop: &ShopDomain) -> String;
}

/// Stripe subscription billing for direct signups.
#[async_trait]
pub trait DirectPayApi: Send + Sync {
    /// Customer id for `email`, created if none exists.
    async fn find_or_create_customer(&self, email: &Email) -> Result<String, ProviderError>;

    /// Reference of the customer's active subscription to the configured price.
    async fn find_active_subscription(
        &self,
        customer: &str,
    ) -> Result<Option<String>, ProviderError>;

    /// Status of a specific subscription.
    async fn subscription_status(
        &self,
        reference: &str,
    ) -> Result<RemoteSubscriptionStatus, ProviderError>;

    /// Subscribe the customer to the configured price.
    ///
    /// Retries carrying the same `idempotency_key` return the same object.
    async fn create_subscription(
        &self,
        customer: &str,
        idempotency_key: &str,
    ) -> Result<CreatedSubscription, ProviderError>;

    /// Billing portal session URL for the customer.
    async fn portal_url(&self, customer: &str, return_url: &str) -> Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_mapping() {
        assert!(matches!(
            BillingError::from(ProviderError::Unavailable("timeout".to_string())),
            BillingError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            BillingError::from(ProviderError::Rejected("card declined".to_string())),
            BillingError::ProviderRejected(_)
        ));
        assert!(matches!(
            BillingError::from(ProviderError::Unauthorized),
            BillingError::SessionMissing
        ));
        assert!(matches!(
            BillingError::from(ProviderError::InvalidResponse("eof".to_string())),
            BillingError::ProviderUnavailable(_)
        ));
    }
}
