//! Merchant inspection and repair commands.
//!
//! # Usage
//!
//! ```bash
//! sigshield-cli merchant show --email ops@acme.example
//! sigshield-cli merchant complete-onboarding --id 42
//! sigshield-cli merchant refresh-billing --id 42
//! ```
//!
//! `refresh-billing` talks to the billing providers, so it needs the full
//! server environment (see `sigshield_server::config`).

use secrecy::ExposeSecret;
use sqlx::PgPool;
use thiserror::Error;

use sigshield_core::{Email, EmailError, MerchantId, ShopDomain, ShopDomainError};
use sigshield_server::billing::BillingError;
use sigshield_server::config::{ConfigError, ServerConfig, database_url_from_env};
use sigshield_server::db::{MerchantStore, PgMerchantStore, RepositoryError, create_pool};
use sigshield_server::models::{Merchant, MerchantView};
use sigshield_server::state::{AppState, Backends};

/// How to find the merchant a command acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MerchantLookup {
    Id(i32),
    Shop(String),
    Email(String),
}

/// Errors from merchant commands.
#[derive(Debug, Error)]
pub enum MerchantCommandError {
    /// Environment is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store operation failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Provider reconciliation failed.
    #[error(transparent)]
    Billing(#[from] BillingError),

    /// A provider client could not be built.
    #[error("Provider client error: {0}")]
    Provider(String),

    #[error("Invalid shop domain: {0}")]
    InvalidShop(#[from] ShopDomainError),

    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// No merchant matched the lookup.
    #[error("Merchant not found: {0}")]
    NotFound(String),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

async fn merchant_store() -> Result<PgMerchantStore, MerchantCommandError> {
    let database_url = database_url_from_env()?;
    tracing::info!("Connecting to database...");
    let pool = PgPool::connect(database_url.expose_secret()).await?;
    Ok(PgMerchantStore::new(pool))
}

async fn find(
    store: &dyn MerchantStore,
    lookup: &MerchantLookup,
) -> Result<Merchant, MerchantCommandError> {
    let found = match lookup {
        MerchantLookup::Id(id) => store.get_by_id(MerchantId::new(*id)).await?,
        MerchantLookup::Shop(shop) => store.get_by_shop_domain(&ShopDomain::parse(shop)?).await?,
        MerchantLookup::Email(email) => store.get_by_email(&Email::parse(email)?).await?,
    };
    found.ok_or_else(|| MerchantCommandError::NotFound(format!("{lookup:?}")))
}

/// Print a merchant's non-sensitive fields as JSON.
///
/// # Errors
///
/// Returns `MerchantCommandError` if the lookup is invalid or finds nothing.
pub async fn show(lookup: MerchantLookup) -> Result<(), MerchantCommandError> {
    let store = merchant_store().await?;
    let merchant = find(&store, &lookup).await?;

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&MerchantView::from(&merchant))?);
    }
    Ok(())
}

/// Mark a merchant's onboarding complete.
///
/// # Errors
///
/// Returns `MerchantCommandError` if the merchant does not exist.
pub async fn complete_onboarding(id: i32) -> Result<(), MerchantCommandError> {
    let store = merchant_store().await?;
    let changed = store
        .set_onboarding_completed(MerchantId::new(id))
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => MerchantCommandError::NotFound(format!("id {id}")),
            other => other.into(),
        })?;

    if changed {
        tracing::info!(merchant_id = id, "Onboarding marked complete");
    } else {
        tracing::info!(merchant_id = id, "Onboarding was already complete");
    }
    Ok(())
}

/// Reconcile a merchant's stored linkage with its billing provider.
///
/// # Errors
///
/// Returns `MerchantCommandError` if configuration, the store or the
/// provider fails.
pub async fn refresh_billing(id: i32) -> Result<(), MerchantCommandError> {
    let config = ServerConfig::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    let backends = Backends::production(&config, &pool)
        .map_err(|e| MerchantCommandError::Provider(e.to_string()))?;
    let state = AppState::new(config, backends);

    let merchant = find(state.merchants(), &MerchantLookup::Id(id)).await?;
    let status = state.reconciler().refresh_status(&merchant).await?;
    tracing::info!(
        merchant_id = id,
        provider = %status.provider,
        active = status.active,
        pending = status.pending,
        "Billing refreshed"
    );

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    Ok(())
}
