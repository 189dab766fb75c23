//! In-memory stores, stub providers and an app harness for tests.
//!
//! Enabled for this crate's unit tests and, through the `test-util`
//! feature, for the integration-tests crate. The stores follow the same
//! conditional-write rules as the `PostgreSQL` queries in [`crate::db`].

#![allow(clippy::missing_panics_doc, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use sigshield_core::{BillingProvider, Email, MerchantId, RemoteSubscriptionStatus, ShopDomain};

use crate::billing::{AppStoreApi, CreatedSubscription, DirectPayApi, ProviderError};
use crate::config::{AuthProviderConfig, ServerConfig, ShopifyConfig, ShopifyPlan, StripeConfig};
use crate::db::{LinkOutcome, MerchantStore, RepositoryError, ShopSessionStore};
use crate::identity::verifier::access_token;
use crate::identity::{AuthError, IdentityVerifier, SHOP_COOKIE_NAME, VerifiedIdentity};
use crate::models::{Merchant, NewMerchant, ShopSession};
use crate::state::{AppState, Backends};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn injected_failure() -> RepositoryError {
    RepositoryError::Database(sqlx::Error::PoolTimedOut)
}

// =============================================================================
// Stores
// =============================================================================

/// Merchant store held in memory.
#[derive(Default)]
pub struct InMemoryMerchantStore {
    merchants: Mutex<Vec<Merchant>>,
    next_id: AtomicI32,
    fail_links: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryMerchantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `set_subscription_ref` fail as if the database were down.
    pub fn fail_links(&self, fail: bool) {
        self.fail_links.store(fail, Ordering::SeqCst);
    }

    /// Make every lookup fail as if the database were down.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delete a merchant row, as an operator might mid-request.
    pub fn remove(&self, id: MerchantId) {
        lock(&self.merchants).retain(|m| m.id != id);
    }

    fn check_reads(&self) -> Result<(), RepositoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }

    fn find_by(&self, predicate: impl Fn(&Merchant) -> bool) -> Result<Option<Merchant>, RepositoryError> {
        self.check_reads()?;
        Ok(lock(&self.merchants).iter().find(|&m| predicate(m)).cloned())
    }

    fn update<T>(
        &self,
        id: MerchantId,
        apply: impl FnOnce(&mut Merchant) -> T,
    ) -> Result<T, RepositoryError> {
        let mut merchants = lock(&self.merchants);
        let merchant = merchants
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(RepositoryError::NotFound)?;
        Ok(apply(merchant))
    }

    fn blank(&self) -> Merchant {
        let now = Utc::now();
        Merchant {
            id: MerchantId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            contact_email: None,
            shop_domain: None,
            onboarding_completed: false,
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
}

#[async_trait]
impl MerchantStore for InMemoryMerchantStore {
    async fn get_by_id(&self, id: MerchantId) -> Result<Option<Merchant>, RepositoryError> {
        self.find_by(|m| m.id == id)
    }

    async fn get_by_shop_domain(
        &self,
        shop: &ShopDomain,
    ) -> Result<Option<Merchant>, RepositoryError> {
        self.find_by(|m| m.shop_domain.as_ref() == Some(shop))
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<Merchant>, RepositoryError> {
        self.find_by(|m| m.contact_email.as_ref() == Some(email))
    }

    async fn get_by_subscription_ref(
        &self,
        reference: &str,
    ) -> Result<Option<Merchant>, RepositoryError> {
        self.find_by(|m| {
            m.provider_subscription_ref.as_deref() == Some(reference)
                || m.pending_subscription_ref.as_deref() == Some(reference)
        })
    }

    async fn upsert_merchant(&self, new: &NewMerchant) -> Result<Merchant, RepositoryError> {
        let blank = self.blank();
        let mut merchants = lock(&self.merchants);
        let now = Utc::now();

        match new {
            NewMerchant::AppStore {
                shop_domain,
                session_ref,
            } => {
                if let Some(existing) = merchants
                    .iter_mut()
                    .find(|m| m.shop_domain.as_ref() == Some(shop_domain))
                {
                    existing.provider_session_ref = Some(session_ref.clone());
                    if existing.provider_subscription_ref.is_none() {
                        existing.billing_provider = BillingProvider::AppStore;
                    }
                    existing.updated_at = now;
                    return Ok(existing.clone());
                }
                let merchant = Merchant {
                    shop_domain: Some(shop_domain.clone()),
                    provider_session_ref: Some(session_ref.clone()),
                    billing_provider: BillingProvider::AppStore,
                    ..blank
                };
                merchants.push(merchant.clone());
                Ok(merchant)
            }
            NewMerchant::Direct {
                email,
                has_password,
                email_login,
            } => {
                if let Some(existing) = merchants
                    .iter_mut()
                    .find(|m| m.contact_email.as_ref() == Some(email))
                {
                    existing.has_password = *has_password;
                    if email_login.is_some() {
                        existing.email_login.clone_from(email_login);
                    }
                    existing.updated_at = now;
                    return Ok(existing.clone());
                }
                let merchant = Merchant {
                    contact_email: Some(email.clone()),
                    has_password: *has_password,
                    email_login: email_login.clone(),
                    ..blank
                };
                merchants.push(merchant.clone());
                Ok(merchant)
            }
        }
    }

    async fn set_onboarding_completed(&self, id: MerchantId) -> Result<bool, RepositoryError> {
        self.update(id, |m| {
            if m.onboarding_completed {
                return false;
            }
            m.onboarding_completed = true;
            m.updated_at = Utc::now();
            true
        })
    }

    async fn set_provider_session_ref(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        session_ref: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.update(id, |m| {
            m.provider_session_ref = session_ref.map(String::from);
            if m.provider_subscription_ref.is_none() {
                m.billing_provider = provider;
            }
            m.updated_at = Utc::now();
        })
    }

    async fn set_subscription_ref(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        reference: &str,
    ) -> Result<LinkOutcome, RepositoryError> {
        if self.fail_links.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        self.update(id, |m| match m.provider_subscription_ref.clone() {
            Some(existing) if existing != reference => LinkOutcome::Conflict { existing },
            _ => {
                m.billing_provider = provider;
                m.provider_subscription_ref = Some(reference.to_string());
                m.pending_subscription_ref = None;
                m.pending_confirmation_url = None;
                m.updated_at = Utc::now();
                LinkOutcome::Linked(m.clone())
            }
        })
    }

    async fn set_pending_subscription(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        reference: &str,
        confirmation_url: &str,
    ) -> Result<bool, RepositoryError> {
        let result = self.update(id, |m| {
            if m.provider_subscription_ref.is_some() {
                return false;
            }
            m.billing_provider = provider;
            m.pending_subscription_ref = Some(reference.to_string());
            m.pending_confirmation_url = Some(confirmation_url.to_string());
            m.updated_at = Utc::now();
            true
        });
        // A missing row updates nothing, same as the SQL
        match result {
            Err(RepositoryError::NotFound) => Ok(false),
            other => other,
        }
    }

    async fn clear_subscription_ref(
        &self,
        id: MerchantId,
        reference: &str,
    ) -> Result<bool, RepositoryError> {
        let result = self.update(id, |m| {
            let mut changed = false;
            if m.provider_subscription_ref.as_deref() == Some(reference) {
                m.provider_subscription_ref = None;
                changed = true;
            }
            if m.pending_subscription_ref.as_deref() == Some(reference) {
                m.pending_subscription_ref = None;
                m.pending_confirmation_url = None;
                changed = true;
            }
            if changed {
                m.updated_at = Utc::now();
            }
            changed
        });
        match result {
            Err(RepositoryError::NotFound) => Ok(false),
            other => other,
        }
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check_reads()
    }
}

/// Shopify offline sessions held in memory.
#[derive(Default)]
pub struct InMemoryShopSessionStore {
    sessions: Mutex<HashMap<String, ShopSession>>,
}

impl InMemoryShopSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShopSessionStore for InMemoryShopSessionStore {
    async fn get(&self, id: &str) -> Result<Option<ShopSession>, RepositoryError> {
        Ok(lock(&self.sessions).get(id).cloned())
    }

    async fn save(&self, session: &ShopSession) -> Result<(), RepositoryError> {
        lock(&self.sessions).insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(lock(&self.sessions).remove(id).is_some())
    }
}

// =============================================================================
// Providers
// =============================================================================

#[derive(Default)]
struct AppStoreLedger {
    subscriptions: Vec<(String, RemoteSubscriptionStatus)>,
    created: usize,
}

/// Shopify billing stand-in.
///
/// Created subscriptions stay pending until [`StubAppStore::approve_all`].
#[derive(Default)]
pub struct StubAppStore {
    ledger: Mutex<AppStoreLedger>,
}

impl StubAppStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions created through the API.
    #[must_use]
    pub fn created(&self) -> usize {
        lock(&self.ledger).created
    }

    /// Merchant approves every pending charge.
    pub fn approve_all(&self) {
        for (_, status) in &mut lock(&self.ledger).subscriptions {
            if *status == RemoteSubscriptionStatus::Pending {
                *status = RemoteSubscriptionStatus::Active;
            }
        }
    }

    /// Cancel every subscription.
    pub fn cancel_all(&self) {
        for (_, status) in &mut lock(&self.ledger).subscriptions {
            *status = RemoteSubscriptionStatus::Inactive;
        }
    }

    /// An active subscription that exists at Shopify but not in our store.
    pub fn insert_active(&self, reference: &str) {
        lock(&self.ledger)
            .subscriptions
            .push((reference.to_string(), RemoteSubscriptionStatus::Active));
    }
}

#[async_trait]
impl AppStoreApi for StubAppStore {
    fn authorization_url(&self, shop: &ShopDomain, state: &str, redirect_uri: &str) -> String {
        format!(
            "https://{shop}/admin/oauth/authorize?client_id=stub&state={state}&redirect_uri={}",
            urlencoding::encode(redirect_uri)
        )
    }

    async fn exchange_code(
        &self,
        shop: &ShopDomain,
        code: &str,
    ) -> Result<ShopSession, ProviderError> {
        if code.is_empty() {
            return Err(ProviderError::Rejected("empty code".to_string()));
        }
        Ok(ShopSession::offline(
            shop.clone(),
            SecretString::from(format!("shpat_{code}")),
            vec!["read_orders".to_string()],
        ))
    }

    async fn find_active_subscription(
        &self,
        _session: &ShopSession,
    ) -> Result<Option<String>, ProviderError> {
        Ok(lock(&self.ledger)
            .subscriptions
            .iter()
            .find(|(_, status)| status.is_active())
            .map(|(reference, _)| reference.clone()))
    }

    async fn subscription_status(
        &self,
        _session: &ShopSession,
        reference: &str,
    ) -> Result<RemoteSubscriptionStatus, ProviderError> {
        Ok(lock(&self.ledger)
            .subscriptions
            .iter()
            .find(|(r, _)| r == reference)
            .map_or(RemoteSubscriptionStatus::Inactive, |(_, status)| *status))
    }

    async fn create_subscription(
        &self,
        session: &ShopSession,
        _return_url: &str,
    ) -> Result<CreatedSubscription, ProviderError> {
        let mut ledger = lock(&self.ledger);
        ledger.created += 1;
        let n = ledger.created;
        let reference = format!("gid://shopify/AppSubscription/{n}");
        ledger
            .subscriptions
            .push((reference.clone(), RemoteSubscriptionStatus::Pending));
        Ok(CreatedSubscription {
            reference,
            confirmation_url: Some(format!("https://{}/admin/charges/{n}/confirm", session.shop)),
        })
    }

    fn manage_url(&self, shop: &ShopDomain) -> String {
        format!(
            "https://admin.shopify.com/store/{}/charges/sigshield/pricing_plans",
            shop.handle()
        )
    }
}

struct StubSubscription {
    reference: String,
    customer: String,
    active: bool,
}

#[derive(Default)]
struct DirectPayLedger {
    customers: HashSet<String>,
    subscriptions: Vec<StubSubscription>,
    idempotency: HashMap<String, String>,
    created: usize,
}

/// Stripe billing stand-in.
///
/// Subscriptions are active as soon as they are created.
#[derive(Default)]
pub struct StubDirectPay {
    ledger: Mutex<DirectPayLedger>,
    delay: Mutex<Duration>,
}

impl StubDirectPay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Slow down subscription creation to widen race windows.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Number of distinct subscriptions created.
    #[must_use]
    pub fn created(&self) -> usize {
        lock(&self.ledger).created
    }

    /// Number of customers created.
    #[must_use]
    pub fn customers_created(&self) -> usize {
        lock(&self.ledger).customers.len()
    }

    /// Cancel every subscription.
    pub fn cancel_all(&self) {
        for subscription in &mut lock(&self.ledger).subscriptions {
            subscription.active = false;
        }
    }
}

#[async_trait]
impl DirectPayApi for StubDirectPay {
    async fn find_or_create_customer(&self, email: &Email) -> Result<String, ProviderError> {
        let customer = format!("cus_{email}");
        lock(&self.ledger).customers.insert(customer.clone());
        Ok(customer)
    }

    async fn find_active_subscription(
        &self,
        customer: &str,
    ) -> Result<Option<String>, ProviderError> {
        Ok(lock(&self.ledger)
            .subscriptions
            .iter()
            .find(|s| s.customer == customer && s.active)
            .map(|s| s.reference.clone()))
    }

    async fn subscription_status(
        &self,
        reference: &str,
    ) -> Result<RemoteSubscriptionStatus, ProviderError> {
        let active = lock(&self.ledger)
            .subscriptions
            .iter()
            .any(|s| s.reference == reference && s.active);
        Ok(if active {
            RemoteSubscriptionStatus::Active
        } else {
            RemoteSubscriptionStatus::Inactive
        })
    }

    async fn create_subscription(
        &self,
        customer: &str,
        idempotency_key: &str,
    ) -> Result<CreatedSubscription, ProviderError> {
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut ledger = lock(&self.ledger);
        if let Some(reference) = ledger.idempotency.get(idempotency_key) {
            return Ok(CreatedSubscription {
                reference: reference.clone(),
                confirmation_url: None,
            });
        }
        ledger.created += 1;
        let reference = format!("sub_{}", ledger.created);
        ledger.subscriptions.push(StubSubscription {
            reference: reference.clone(),
            customer: customer.to_string(),
            active: true,
        });
        ledger
            .idempotency
            .insert(idempotency_key.to_string(), reference.clone());
        Ok(CreatedSubscription {
            reference,
            confirmation_url: None,
        })
    }

    async fn portal_url(&self, customer: &str, return_url: &str) -> Result<String, ProviderError> {
        Ok(format!(
            "https://billing.stripe.test/p/session/{customer}?return_url={}",
            urlencoding::encode(return_url)
        ))
    }
}

// =============================================================================
// Identity
// =============================================================================

#[derive(Default)]
struct VerifierState {
    tokens: HashMap<String, Email>,
    revoked: HashSet<String>,
    unavailable: bool,
    calls: usize,
}

/// Auth service stand-in with a fixed token table.
#[derive(Default)]
pub struct StaticVerifier {
    state: Mutex<VerifierState>,
}

impl StaticVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as a confirmed session for `email`.
    pub fn allow(&self, token: &str, email: &str) {
        let email = Email::parse(email).expect("valid test email");
        lock(&self.state).tokens.insert(token.to_string(), email);
    }

    /// Simulate an auth service outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    /// Number of `verify` calls that reached the auth service.
    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.state).calls
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, headers: &HeaderMap) -> Result<Option<VerifiedIdentity>, AuthError> {
        let Some(token) = access_token(headers) else {
            return Ok(None);
        };
        let mut state = lock(&self.state);
        state.calls += 1;
        if state.unavailable {
            return Err(AuthError::Unavailable("auth service down".to_string()));
        }
        if state.revoked.contains(&token) {
            return Ok(None);
        }
        Ok(state.tokens.get(&token).map(|email| VerifiedIdentity {
            email: email.clone(),
            has_password: true,
            email_login: Some(email.to_string()),
        }))
    }

    async fn revoke(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let Some(token) = access_token(headers) else {
            return Ok(());
        };
        let mut state = lock(&self.state);
        if state.unavailable {
            return Err(AuthError::Unavailable("auth service down".to_string()));
        }
        state.revoked.insert(token);
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Installed app-store merchant with a saved offline session.
pub async fn app_store_merchant(
    merchants: &InMemoryMerchantStore,
    sessions: &InMemoryShopSessionStore,
    shop: &ShopDomain,
    onboarded: bool,
) -> Merchant {
    let session = ShopSession::offline(
        shop.clone(),
        SecretString::from("shpat_test_token"),
        vec!["read_orders".to_string()],
    );
    sessions.save(&session).await.expect("save shop session");
    let merchant = merchants
        .upsert_merchant(&NewMerchant::AppStore {
            shop_domain: shop.clone(),
            session_ref: session.id,
        })
        .await
        .expect("upsert merchant");
    finish(merchants, merchant.id, onboarded).await
}

/// Direct-signup merchant.
pub async fn direct_merchant(merchants: &InMemoryMerchantStore, email: &str, onboarded: bool) -> Merchant {
    let merchant = merchants
        .upsert_merchant(&NewMerchant::Direct {
            email: Email::parse(email).expect("valid test email"),
            has_password: true,
            email_login: None,
        })
        .await
        .expect("upsert merchant");
    finish(merchants, merchant.id, onboarded).await
}

async fn finish(merchants: &InMemoryMerchantStore, id: MerchantId, onboarded: bool) -> Merchant {
    if onboarded {
        merchants
            .set_onboarding_completed(id)
            .await
            .expect("complete onboarding");
    }
    merchants
        .get_by_id(id)
        .await
        .expect("load merchant")
        .expect("merchant exists")
}

/// Configuration with both providers enabled and throwaway secrets.
#[must_use]
pub fn test_config() -> ServerConfig {
    ServerConfig {
        database_url: SecretString::from("postgres://localhost/sigshield_test"),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 3000,
        base_url: "http://localhost:3000".to_string(),
        session_secret: SecretString::from("Qm9x7Lr2Vt8Wp4Zk6Ns1Jd3Hf5Gb0Cy9Ae"),
        cookie_secret: SecretString::from("Tz4Kq8Rm1Xw6Vn3Lp9Hs2Db7Fj5Gc0Yu8Ei"),
        provider_timeout: Duration::from_secs(5),
        shopify: Some(ShopifyConfig {
            api_key: "stub_client_id".to_string(),
            api_secret: SecretString::from("shopify_test_secret"),
            app_handle: "sigshield".to_string(),
            scopes: vec!["read_orders".to_string()],
            api_version: "2026-01".to_string(),
            plan: ShopifyPlan {
                name: "SigShield Pro".to_string(),
                price: Decimal::new(1900, 2),
                currency: "USD".to_string(),
                trial_days: 0,
                test: true,
            },
        }),
        stripe: Some(StripeConfig {
            secret_key: SecretString::from("sk_test_stub"),
            price_id: "price_stub".to_string(),
            webhook_secret: SecretString::from("whsec_stub"),
        }),
        auth: AuthProviderConfig {
            url: "http://127.0.0.1:9".to_string(),
            api_key: SecretString::from("anon_stub"),
        },
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// Append a valid Shopify `hmac` to query parameters.
#[must_use]
pub fn signed_shopify_query(params: &[(&str, &str)], secret: &SecretString) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    let mut sorted = pairs.clone();
    sorted.sort();
    let message = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    pairs.push(("hmac".to_string(), hex::encode(mac.finalize().into_bytes())));
    pairs
}

/// Full application wired to in-memory stores and stub providers.
pub struct TestApp {
    pub merchants: Arc<InMemoryMerchantStore>,
    pub shop_sessions: Arc<InMemoryShopSessionStore>,
    pub app_store: Arc<StubAppStore>,
    pub direct_pay: Arc<StubDirectPay>,
    pub verifier: Arc<StaticVerifier>,
    pub state: AppState,
}

impl TestApp {
    /// App with both providers enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// App with providers enabled according to `config`.
    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        let merchants = Arc::new(InMemoryMerchantStore::new());
        let shop_sessions = Arc::new(InMemoryShopSessionStore::new());
        let app_store = Arc::new(StubAppStore::new());
        let direct_pay = Arc::new(StubDirectPay::new());
        let verifier = Arc::new(StaticVerifier::new());

        let backends = Backends {
            merchants: merchants.clone(),
            shop_sessions: shop_sessions.clone(),
            app_store: config
                .shopify
                .as_ref()
                .map(|_| app_store.clone() as Arc<dyn AppStoreApi>),
            direct_pay: config
                .stripe
                .as_ref()
                .map(|_| direct_pay.clone() as Arc<dyn DirectPayApi>),
            verifier: verifier.clone(),
        };

        Self {
            merchants,
            shop_sessions,
            app_store,
            direct_pay,
            verifier,
            state: AppState::new(config, backends),
        }
    }

    /// Router with in-memory sessions, as `main` builds it minus Sentry.
    #[must_use]
    pub fn router(&self) -> Router {
        crate::middleware::with_sessions(
            crate::router(self.state.clone()),
            tower_sessions::MemoryStore::default(),
            self.state.config(),
        )
        .expect("session layer")
    }

    /// `Cookie` header value carrying a fresh shop cookie.
    #[must_use]
    pub fn shop_cookie(&self, shop: &ShopDomain) -> String {
        let value = self
            .state
            .bridge()
            .cookies()
            .sign(shop, Utc::now().timestamp());
        format!("{SHOP_COOKIE_NAME}={value}")
    }

    /// Installed app-store merchant.
    pub async fn app_store_merchant(&self, shop: &str, onboarded: bool) -> Merchant {
        let shop = ShopDomain::parse(shop).expect("valid test shop");
        app_store_merchant(&self.merchants, &self.shop_sessions, &shop, onboarded).await
    }

    /// Direct-signup merchant whose `token` the auth stub accepts.
    pub async fn direct_merchant(&self, token: &str, email: &str, onboarded: bool) -> Merchant {
        self.verifier.allow(token, email);
        direct_merchant(&self.merchants, email, onboarded).await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}
