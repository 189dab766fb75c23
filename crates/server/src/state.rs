//! Application state shared across handlers.

use std::sync::Arc;

use axum::http::HeaderMap;
use sqlx::PgPool;

use crate::access::{AccessGate, AccessPolicy};
use crate::billing::shopify::ShopifyBilling;
use crate::billing::stripe::StripeBilling;
use crate::billing::{AppStoreApi, BillingReconciler, DirectPayApi, ReconcileLocks};
use crate::config::ServerConfig;
use crate::db::{MerchantStore, PgMerchantStore, PgShopSessionStore, ShopSessionStore};
use crate::error::{AppError, set_sentry_user};
use crate::identity::{
    HostedAuthVerifier, IdentityVerifier, Principal, SessionBridge, ShopCookieSigner,
    TenantResolver,
};

/// Stores and provider clients the server runs against.
///
/// Production wiring comes from [`Backends::production`]; tests substitute
/// in-memory stores and stub providers.
pub struct Backends {
    pub merchants: Arc<dyn MerchantStore>,
    pub shop_sessions: Arc<dyn ShopSessionStore>,
    pub app_store: Option<Arc<dyn AppStoreApi>>,
    pub direct_pay: Option<Arc<dyn DirectPayApi>>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl Backends {
    /// Postgres stores plus the providers enabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider HTTP client cannot be built.
    pub fn production(config: &ServerConfig, pool: &PgPool) -> Result<Self, reqwest::Error> {
        let timeout = config.provider_timeout;

        let app_store: Option<Arc<dyn AppStoreApi>> = match &config.shopify {
            Some(shopify) => Some(Arc::new(ShopifyBilling::new(shopify, timeout)?)),
            None => None,
        };
        let direct_pay: Option<Arc<dyn DirectPayApi>> = match &config.stripe {
            Some(stripe) => Some(Arc::new(StripeBilling::new(stripe, timeout)?)),
            None => None,
        };

        Ok(Self {
            merchants: Arc::new(PgMerchantStore::new(pool.clone())),
            shop_sessions: Arc::new(PgShopSessionStore::new(pool.clone())),
            app_store,
            direct_pay,
            verifier: Arc::new(HostedAuthVerifier::new(&config.auth, timeout)?),
        })
    }
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// the stores, providers and access-control components.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    merchants: Arc<dyn MerchantStore>,
    shop_sessions: Arc<dyn ShopSessionStore>,
    app_store: Option<Arc<dyn AppStoreApi>>,
    bridge: SessionBridge,
    resolver: TenantResolver,
    gate: AccessGate,
    policy: AccessPolicy,
    reconciler: BillingReconciler,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(config: ServerConfig, backends: Backends) -> Self {
        let Backends {
            merchants,
            shop_sessions,
            app_store,
            direct_pay,
            verifier,
        } = backends;

        let cookies = ShopCookieSigner::new(config.cookie_secret.clone(), config.is_secure());
        let gate = AccessGate::new(app_store.is_some(), direct_pay.is_some());
        let reconciler = BillingReconciler::new(
            merchants.clone(),
            shop_sessions.clone(),
            app_store.clone(),
            direct_pay,
            config.base_url.clone(),
        )
        .with_locks(ReconcileLocks::for_provider_timeout(config.provider_timeout));

        Self {
            inner: Arc::new(AppStateInner {
                bridge: SessionBridge::new(cookies, verifier),
                resolver: TenantResolver::new(merchants.clone()),
                gate,
                policy: AccessPolicy::default(),
                reconciler,
                merchants,
                shop_sessions,
                app_store,
                config,
            }),
        }
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the merchant store.
    #[must_use]
    pub fn merchants(&self) -> &dyn MerchantStore {
        self.inner.merchants.as_ref()
    }

    /// Get a reference to the Shopify session store.
    #[must_use]
    pub fn shop_sessions(&self) -> &dyn ShopSessionStore {
        self.inner.shop_sessions.as_ref()
    }

    /// The Shopify client, if Shopify is configured.
    #[must_use]
    pub fn app_store(&self) -> Option<&dyn AppStoreApi> {
        self.inner.app_store.as_deref()
    }

    /// Get a reference to the session/cookie bridge.
    #[must_use]
    pub fn bridge(&self) -> &SessionBridge {
        &self.inner.bridge
    }

    /// Get the access gate.
    #[must_use]
    pub fn gate(&self) -> AccessGate {
        self.inner.gate
    }

    /// Get a reference to the path policy.
    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.inner.policy
    }

    /// Get a reference to the billing reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &BillingReconciler {
        &self.inner.reconciler
    }

    /// Resolve the merchant a request belongs to.
    ///
    /// Attaches the merchant to the Sentry scope when one is found.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the auth service or the merchant store fails.
    pub async fn resolve_principal(&self, headers: &HeaderMap) -> Result<Principal, AppError> {
        let channel = self.inner.bridge.extract_principal(headers).await?;
        let principal = self.inner.resolver.resolve(channel).await?;

        if let Principal::Merchant { merchant, channel } = &principal {
            set_sentry_user(
                &merchant.id,
                merchant.contact_email.as_ref().map(|email| email.as_str()),
            );
            tracing::debug!(merchant_id = %merchant.id, channel = channel.name(), "Resolved merchant");
        }
        Ok(principal)
    }
}
