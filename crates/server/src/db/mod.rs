//! Database operations for the merchant backend.
//!
//! # Tables
//!
//! - `merchant` - Tenants, onboarding state and billing linkage
//! - `shop_session` - Shopify offline access tokens
//! - `tower_sessions.session` - Tower-sessions storage (install handshake state)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p sigshield-cli -- migrate
//! ```
//!
//! Handlers and the billing reconciler only see the [`MerchantStore`] and
//! [`ShopSessionStore`] traits, so tests can swap in the in-memory stores
//! from `crate::testing`.

pub mod merchants;
pub mod shop_sessions;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use sigshield_core::{BillingProvider, Email, MerchantId, ShopDomain};

use crate::models::{Merchant, NewMerchant, ShopSession};

pub use merchants::PgMerchantStore;
pub use shop_sessions::PgShopSessionStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., a subscription ref already owned by another merchant).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Map unique-constraint violations to [`RepositoryError::Conflict`].
    pub(crate) fn from_write(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(what.to_string());
        }
        Self::Database(err)
    }
}

/// Result of a conditional subscription-link write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The reference is now linked (or already was).
    Linked(Merchant),
    /// A different reference was linked first and was left in place.
    Conflict {
        /// Reference that stays linked.
        existing: String,
    },
}

/// Persistence of merchant tenants.
#[async_trait]
pub trait MerchantStore: Send + Sync {
    /// Look up a merchant by internal id.
    async fn get_by_id(&self, id: MerchantId) -> Result<Option<Merchant>, RepositoryError>;

    /// Look up an app-store merchant.
    async fn get_by_shop_domain(
        &self,
        shop: &ShopDomain,
    ) -> Result<Option<Merchant>, RepositoryError>;

    /// Look up a direct-channel merchant.
    async fn get_by_email(&self, email: &Email) -> Result<Option<Merchant>, RepositoryError>;

    /// Look up the merchant whose linked or pending subscription is `reference`.
    async fn get_by_subscription_ref(
        &self,
        reference: &str,
    ) -> Result<Option<Merchant>, RepositoryError>;

    /// Create the merchant for a newly resolved identity, or refresh the
    /// channel fields of the existing one.
    async fn upsert_merchant(&self, new: &NewMerchant) -> Result<Merchant, RepositoryError>;

    /// Mark onboarding complete.
    ///
    /// Returns `true` if the flag changed, `false` if it was already set.
    async fn set_onboarding_completed(&self, id: MerchantId) -> Result<bool, RepositoryError>;

    /// Remember (or forget) the provider-side account used for billing.
    ///
    /// Selects `provider` as the billing provider unless a subscription is
    /// already linked.
    async fn set_provider_session_ref(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        session_ref: Option<&str>,
    ) -> Result<(), RepositoryError>;

    /// Link a subscription if no other reference is linked.
    ///
    /// Clears any pending subscription on success.
    async fn set_subscription_ref(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        reference: &str,
    ) -> Result<LinkOutcome, RepositoryError>;

    /// Record a subscription awaiting merchant approval.
    ///
    /// Returns `false` if a subscription is already linked.
    async fn set_pending_subscription(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        reference: &str,
        confirmation_url: &str,
    ) -> Result<bool, RepositoryError>;

    /// Drop `reference` from the linked or pending slot, whichever holds it.
    ///
    /// Returns `false` if neither slot held it.
    async fn clear_subscription_ref(
        &self,
        id: MerchantId,
        reference: &str,
    ) -> Result<bool, RepositoryError>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Persistence of Shopify offline sessions.
#[async_trait]
pub trait ShopSessionStore: Send + Sync {
    /// Load a session by id.
    async fn get(&self, id: &str) -> Result<Option<ShopSession>, RepositoryError>;

    /// Save or replace the session for its shop.
    async fn save(&self, session: &ShopSession) -> Result<(), RepositoryError>;

    /// Delete a session. Returns `true` if one existed.
    async fn delete(&self, id: &str) -> Result<bool, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
