//! Billing reconciliation: keeping a merchant's stored linkage in step with
//! the subscription that actually exists at its provider.
//!
//! Every operation here runs under the merchant's [`ReconcileLocks`] entry
//! and starts from a fresh read of the merchant row, so two concurrent
//! requests never both decide that a subscription is missing.

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use sigshield_core::{
    BillingProvider, IdentityChannel, MerchantId, RemoteSubscriptionStatus,
};

use super::{AppStoreApi, BillingError, CreatedSubscription, DirectPayApi, ReconcileLocks};
use crate::db::{LinkOutcome, MerchantStore, RepositoryError, ShopSessionStore};
use crate::models::{Merchant, ShopSession};

/// Path Shopify returns the merchant to after approving a charge.
pub const CONFIRM_PATH: &str = "/billing/confirm";

/// Result of [`BillingReconciler::ensure_subscription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnsureOutcome {
    /// Whether a new subscription object was created at the provider.
    pub created: bool,
    /// Where the merchant must approve the subscription, if still pending.
    pub confirmation_url: Option<String>,
    /// Whether the merchant now holds an active linked subscription.
    pub active: bool,
}

impl EnsureOutcome {
    const fn active(created: bool) -> Self {
        Self {
            created,
            confirmation_url: None,
            active: true,
        }
    }

    const fn pending(created: bool, confirmation_url: String) -> Self {
        Self {
            created,
            confirmation_url: Some(confirmation_url),
            active: false,
        }
    }
}

/// Billing state after a provider refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingStatus {
    pub provider: BillingProvider,
    pub active: bool,
    pub pending: bool,
    pub confirmation_url: Option<String>,
}

impl From<&Merchant> for BillingStatus {
    fn from(merchant: &Merchant) -> Self {
        Self {
            provider: merchant.billing_provider,
            active: merchant.has_active_subscription(),
            pending: merchant.pending_subscription_ref.is_some(),
            confirmation_url: merchant.pending_confirmation_url.clone(),
        }
    }
}

/// Provider account a reconciliation runs against.
enum Account {
    AppStore {
        api: Arc<dyn AppStoreApi>,
        session: ShopSession,
    },
    DirectPay {
        api: Arc<dyn DirectPayApi>,
        customer: String,
    },
}

impl Account {
    async fn status(&self, reference: &str) -> Result<RemoteSubscriptionStatus, BillingError> {
        let status = match self {
            Self::AppStore { api, session } => api.subscription_status(session, reference).await,
            Self::DirectPay { api, .. } => api.subscription_status(reference).await,
        }?;
        Ok(status)
    }

    async fn find_active(&self) -> Result<Option<String>, BillingError> {
        let found = match self {
            Self::AppStore { api, session } => api.find_active_subscription(session).await,
            Self::DirectPay { api, customer } => api.find_active_subscription(customer).await,
        }?;
        Ok(found)
    }

    /// `replaces` names the subscription this one supersedes, if any.
    async fn create(
        &self,
        merchant: MerchantId,
        replaces: Option<&str>,
        return_url: &str,
    ) -> Result<CreatedSubscription, BillingError> {
        let created = match self {
            Self::AppStore { api, session } => api.create_subscription(session, return_url).await,
            Self::DirectPay { api, customer } => {
                // Retries of the same attempt within a minute share one object
                let bucket = chrono::Utc::now().timestamp() / 60;
                let replaces = replaces.unwrap_or("none");
                let key = format!("sigshield-subscription-{merchant}-{replaces}-{bucket}");
                api.create_subscription(customer, &key).await
            }
        }?;
        Ok(created)
    }
}

/// Ensures merchants hold exactly one live provider subscription.
#[derive(Clone)]
pub struct BillingReconciler {
    merchants: Arc<dyn MerchantStore>,
    shop_sessions: Arc<dyn ShopSessionStore>,
    app_store: Option<Arc<dyn AppStoreApi>>,
    direct_pay: Option<Arc<dyn DirectPayApi>>,
    locks: ReconcileLocks,
    base_url: String,
}

impl BillingReconciler {
    /// Create a reconciler over the given stores and configured providers.
    #[must_use]
    pub fn new(
        merchants: Arc<dyn MerchantStore>,
        shop_sessions: Arc<dyn ShopSessionStore>,
        app_store: Option<Arc<dyn AppStoreApi>>,
        direct_pay: Option<Arc<dyn DirectPayApi>>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            merchants,
            shop_sessions,
            app_store,
            direct_pay,
            locks: ReconcileLocks::new(),
            base_url: base_url.into(),
        }
    }

    /// Replace the lock table, e.g. one sized for the provider timeout.
    #[must_use]
    pub fn with_locks(mut self, locks: ReconcileLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Make sure `merchant` has a subscription at `provider`, creating one
    /// only if none is linked, pending or already active there.
    ///
    /// # Errors
    ///
    /// - `SessionMissing` if the provider session or direct identity is absent
    ///   (nothing is written in that case)
    /// - `ProviderUnavailable` / `ProviderRejected` for provider failures
    /// - `PersistenceFailure` if a provider subscription exists but could not
    ///   be recorded
    /// - `NotConfigured` / `ProviderConflict` for provider mismatches
    #[instrument(skip(self, merchant, channel), fields(merchant_id = %merchant.id, %provider))]
    pub async fn ensure_subscription(
        &self,
        merchant: &Merchant,
        provider: BillingProvider,
        channel: &IdentityChannel,
    ) -> Result<EnsureOutcome, BillingError> {
        let _guard = self.locks.acquire(merchant.id).await;
        let current = self.reload(merchant.id).await?;

        if current.provider_subscription_ref.is_some() && current.billing_provider != provider {
            return Err(BillingError::ProviderConflict {
                current: current.billing_provider,
            });
        }

        let account = self.open_account(&current, provider, channel).await?;

        if let Some(linked) = current.linked_ref_for(provider) {
            if account.status(linked).await?.is_active() {
                tracing::debug!("Linked subscription is active");
                return Ok(EnsureOutcome::active(false));
            }
            tracing::info!(reference = linked, "Linked subscription no longer active, clearing");
            self.merchants
                .clear_subscription_ref(current.id, linked)
                .await?;
        }

        if let Some(pending) = current.pending_ref_for(provider) {
            match account.status(pending).await? {
                RemoteSubscriptionStatus::Active => {
                    return self.link(current.id, provider, pending, false).await;
                }
                RemoteSubscriptionStatus::Pending => {
                    if let Some(url) = current.pending_confirmation_url.clone() {
                        return Ok(EnsureOutcome::pending(false, url));
                    }
                }
                RemoteSubscriptionStatus::Inactive => {}
            }
            tracing::info!(reference = pending, "Discarding pending subscription");
            self.merchants
                .clear_subscription_ref(current.id, pending)
                .await?;
        }

        if let Some(existing) = account.find_active().await? {
            tracing::info!(reference = %existing, "Found active subscription at provider");
            return self.link(current.id, provider, &existing, false).await;
        }

        let return_url = format!("{}{CONFIRM_PATH}", self.base_url);
        let created = account
            .create(
                current.id,
                current.provider_subscription_ref.as_deref(),
                &return_url,
            )
            .await?;
        tracing::info!(
            reference = %created.reference,
            needs_confirmation = created.confirmation_url.is_some(),
            "Created provider subscription"
        );

        match created.confirmation_url {
            Some(url) => {
                let stored = self
                    .merchants
                    .set_pending_subscription(current.id, provider, &created.reference, &url)
                    .await
                    .map_err(|source| {
                        persistence_failure(current.id, provider, &created.reference, source)
                    })?;
                if !stored {
                    tracing::warn!(
                        reference = %created.reference,
                        "Subscription linked concurrently; pending subscription not recorded"
                    );
                }
                Ok(EnsureOutcome::pending(true, url))
            }
            None => {
                self.link(current.id, provider, &created.reference, true)
                    .await
            }
        }
    }

    /// Ask the provider whether the stored linkage is still accurate and
    /// correct it if not.
    ///
    /// # Errors
    ///
    /// Returns a `BillingError` if the provider or the store fails.
    #[instrument(skip(self, merchant), fields(merchant_id = %merchant.id))]
    pub async fn refresh_status(&self, merchant: &Merchant) -> Result<BillingStatus, BillingError> {
        let _guard = self.locks.acquire(merchant.id).await;
        let current = self.reload(merchant.id).await?;
        let provider = current.billing_provider;

        if let Some(linked) = current.linked_ref_for(provider) {
            let status = self.remote_status(&current, provider, linked).await?;
            if !status.is_active() {
                tracing::info!(reference = linked, "Subscription no longer active, clearing");
                self.merchants
                    .clear_subscription_ref(current.id, linked)
                    .await?;
            }
        } else if let Some(pending) = current.pending_ref_for(provider) {
            match self.remote_status(&current, provider, pending).await? {
                RemoteSubscriptionStatus::Active => {
                    self.link(current.id, provider, pending, false).await?;
                }
                RemoteSubscriptionStatus::Inactive => {
                    self.merchants
                        .clear_subscription_ref(current.id, pending)
                        .await?;
                }
                RemoteSubscriptionStatus::Pending => {}
            }
        }

        let refreshed = self.reload(merchant.id).await?;
        Ok(BillingStatus::from(&refreshed))
    }

    /// Provider page where the merchant manages their subscription.
    ///
    /// # Errors
    ///
    /// Returns `SessionMissing` if the merchant has no provider account, or
    /// a provider error if the portal session cannot be created.
    #[instrument(skip(self, merchant), fields(merchant_id = %merchant.id))]
    pub async fn manage_url(&self, merchant: &Merchant) -> Result<String, BillingError> {
        match merchant.effective_provider() {
            BillingProvider::AppStore => {
                let api = self.app_store_api()?;
                let shop = merchant
                    .shop_domain
                    .as_ref()
                    .ok_or(BillingError::SessionMissing)?;
                Ok(api.manage_url(shop))
            }
            BillingProvider::DirectPay | BillingProvider::None => {
                let api = self.direct_pay_api()?;
                let customer = merchant
                    .provider_session_ref
                    .as_deref()
                    .ok_or(BillingError::SessionMissing)?;
                let return_url = format!("{}/app", self.base_url);
                Ok(api.portal_url(customer, &return_url).await?)
            }
        }
    }

    /// Apply a provider-pushed status change for `reference`.
    ///
    /// Returns `true` if the merchant's linkage changed.
    ///
    /// # Errors
    ///
    /// Returns a `BillingError` if the store fails.
    #[instrument(skip(self), fields(%merchant_id, %provider))]
    pub async fn apply_remote_status(
        &self,
        merchant_id: MerchantId,
        provider: BillingProvider,
        reference: &str,
        status: RemoteSubscriptionStatus,
    ) -> Result<bool, BillingError> {
        let _guard = self.locks.acquire(merchant_id).await;
        let current = self.reload(merchant_id).await?;

        match status {
            RemoteSubscriptionStatus::Active => {
                if current.linked_ref_for(provider) == Some(reference) {
                    return Ok(false);
                }
                if current.provider_subscription_ref.is_some() {
                    tracing::warn!(
                        reference,
                        linked = ?current.provider_subscription_ref,
                        "Active subscription reported while another is linked"
                    );
                    return Ok(false);
                }
                self.link(merchant_id, provider, reference, false).await?;
                Ok(true)
            }
            RemoteSubscriptionStatus::Inactive => Ok(self
                .merchants
                .clear_subscription_ref(merchant_id, reference)
                .await?),
            RemoteSubscriptionStatus::Pending => Ok(false),
        }
    }

    /// Forget an uninstalled shop's session and billing linkage.
    ///
    /// Shopify cancels app subscriptions on uninstall, so nothing is left to
    /// reconcile against.
    ///
    /// # Errors
    ///
    /// Returns a `BillingError` if the store fails.
    #[instrument(skip(self, merchant), fields(merchant_id = %merchant.id))]
    pub async fn forget_app_store(&self, merchant: &Merchant) -> Result<(), BillingError> {
        let _guard = self.locks.acquire(merchant.id).await;
        let current = self.reload(merchant.id).await?;

        if let Some(session_ref) = current.provider_session_ref.as_deref()
            && current.billing_provider == BillingProvider::AppStore
        {
            self.shop_sessions.delete(session_ref).await?;
        }
        for reference in [
            current.linked_ref_for(BillingProvider::AppStore),
            current.pending_ref_for(BillingProvider::AppStore),
        ]
        .into_iter()
        .flatten()
        {
            self.merchants
                .clear_subscription_ref(current.id, reference)
                .await?;
        }
        if current.billing_provider == BillingProvider::AppStore {
            self.merchants
                .set_provider_session_ref(current.id, BillingProvider::AppStore, None)
                .await?;
        }
        Ok(())
    }

    async fn reload(&self, id: MerchantId) -> Result<Merchant, BillingError> {
        self.merchants
            .get_by_id(id)
            .await?
            .ok_or(BillingError::Repository(RepositoryError::NotFound))
    }

    fn app_store_api(&self) -> Result<Arc<dyn AppStoreApi>, BillingError> {
        self.app_store
            .clone()
            .ok_or(BillingError::NotConfigured(BillingProvider::AppStore))
    }

    fn direct_pay_api(&self) -> Result<Arc<dyn DirectPayApi>, BillingError> {
        self.direct_pay
            .clone()
            .ok_or(BillingError::NotConfigured(BillingProvider::DirectPay))
    }

    async fn load_shop_session(&self, merchant: &Merchant) -> Result<ShopSession, BillingError> {
        let session_ref = merchant
            .provider_session_ref
            .as_deref()
            .ok_or(BillingError::SessionMissing)?;
        self.shop_sessions
            .get(session_ref)
            .await?
            .ok_or(BillingError::SessionMissing)
    }

    /// Resolve the provider account, failing before any write if it is absent.
    async fn open_account(
        &self,
        merchant: &Merchant,
        provider: BillingProvider,
        channel: &IdentityChannel,
    ) -> Result<Account, BillingError> {
        match provider {
            BillingProvider::AppStore => {
                let api = self.app_store_api()?;
                let session = self.load_shop_session(merchant).await?;
                Ok(Account::AppStore { api, session })
            }
            BillingProvider::DirectPay => {
                let api = self.direct_pay_api()?;
                let IdentityChannel::Direct { email } = channel else {
                    return Err(BillingError::SessionMissing);
                };
                let known = merchant
                    .provider_session_ref
                    .clone()
                    .filter(|_| merchant.billing_provider == BillingProvider::DirectPay);
                let customer = match known {
                    Some(customer) => customer,
                    None => {
                        let customer = api.find_or_create_customer(email).await?;
                        self.merchants
                            .set_provider_session_ref(
                                merchant.id,
                                BillingProvider::DirectPay,
                                Some(&customer),
                            )
                            .await?;
                        customer
                    }
                };
                Ok(Account::DirectPay { api, customer })
            }
            BillingProvider::None => Err(BillingError::NotConfigured(BillingProvider::None)),
        }
    }

    async fn remote_status(
        &self,
        merchant: &Merchant,
        provider: BillingProvider,
        reference: &str,
    ) -> Result<RemoteSubscriptionStatus, BillingError> {
        let status = match provider {
            BillingProvider::AppStore => {
                let api = self.app_store_api()?;
                let session = self.load_shop_session(merchant).await?;
                api.subscription_status(&session, reference).await?
            }
            BillingProvider::DirectPay => {
                self.direct_pay_api()?
                    .subscription_status(reference)
                    .await?
            }
            BillingProvider::None => RemoteSubscriptionStatus::Inactive,
        };
        Ok(status)
    }

    async fn link(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        reference: &str,
        created: bool,
    ) -> Result<EnsureOutcome, BillingError> {
        let outcome = self
            .merchants
            .set_subscription_ref(id, provider, reference)
            .await
            .map_err(|source| persistence_failure(id, provider, reference, source))?;

        match outcome {
            LinkOutcome::Linked(_) => {
                tracing::info!(reference, "Linked subscription");
            }
            LinkOutcome::Conflict { existing } => {
                tracing::warn!(
                    reference,
                    %existing,
                    "Duplicate provider subscription; keeping the one linked first"
                );
            }
        }
        Ok(EnsureOutcome::active(created))
    }
}

/// Record a subscription that exists at the provider but not in our store.
fn persistence_failure(
    id: MerchantId,
    provider: BillingProvider,
    reference: &str,
    source: RepositoryError,
) -> BillingError {
    tracing::error!(
        merchant_id = %id,
        %provider,
        reference,
        error = %source,
        "Reconciliation gap: provider subscription not recorded"
    );
    BillingError::PersistenceFailure {
        provider,
        reference: reference.to_string(),
        source,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::time::Duration;

    use sigshield_core::{Email, ShopDomain};

    use crate::testing::{
        InMemoryMerchantStore, InMemoryShopSessionStore, StubAppStore, StubDirectPay,
        app_store_merchant, direct_merchant,
    };

    struct Fixture {
        merchants: Arc<InMemoryMerchantStore>,
        sessions: Arc<InMemoryShopSessionStore>,
        app_store: Arc<StubAppStore>,
        direct_pay: Arc<StubDirectPay>,
        reconciler: BillingReconciler,
    }

    fn fixture() -> Fixture {
        let merchants = Arc::new(InMemoryMerchantStore::new());
        let sessions = Arc::new(InMemoryShopSessionStore::new());
        let app_store = Arc::new(StubAppStore::new());
        let direct_pay = Arc::new(StubDirectPay::new());
        let reconciler = BillingReconciler::new(
            merchants.clone(),
            sessions.clone(),
            Some(app_store.clone()),
            Some(direct_pay.clone()),
            "https://app.sigshield.test",
        );
        Fixture {
            merchants,
            sessions,
            app_store,
            direct_pay,
            reconciler,
        }
    }

    fn acme() -> ShopDomain {
        ShopDomain::parse("acme.myshopify.com").unwrap()
    }

    fn app_channel() -> IdentityChannel {
        IdentityChannel::AppStore { shop_domain: acme() }
    }

    fn direct_channel() -> IdentityChannel {
        IdentityChannel::Direct {
            email: Email::parse("ops@acme.example").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_app_store_creates_pending_subscription() {
        let f = fixture();
        let merchant = app_store_merchant(&f.merchants, &f.sessions, &acme(), true).await;

        let outcome = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap();

        assert!(outcome.created);
        assert!(!outcome.active);
        assert!(outcome.confirmation_url.is_some());
        assert_eq!(f.app_store.created(), 1);

        let stored = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
        assert!(stored.pending_subscription_ref.is_some());
        assert!(!stored.has_active_subscription());
    }

    #[tokio::test]
    async fn test_pending_subscription_is_reused() {
        let f = fixture();
        let merchant = app_store_merchant(&f.merchants, &f.sessions, &acme(), true).await;

        let first = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap();
        let second = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(first.confirmation_url, second.confirmation_url);
        assert_eq!(f.app_store.created(), 1);
    }

    #[tokio::test]
    async fn test_approved_pending_subscription_is_linked() {
        let f = fixture();
        let merchant = app_store_merchant(&f.merchants, &f.sessions, &acme(), true).await;

        f.reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap();
        f.app_store.approve_all();

        let outcome = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap();
        assert!(outcome.active);
        assert!(!outcome.created);

        let stored = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
        assert!(stored.has_active_subscription());
        assert!(stored.pending_subscription_ref.is_none());
    }

    #[tokio::test]
    async fn test_existing_remote_subscription_is_linked_not_recreated() {
        let f = fixture();
        let merchant = app_store_merchant(&f.merchants, &f.sessions, &acme(), true).await;
        f.app_store
            .insert_active("gid://shopify/AppSubscription/existing");

        let outcome = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap();

        assert!(outcome.active);
        assert!(!outcome.created);
        assert_eq!(f.app_store.created(), 0);
        let stored = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
        assert_eq!(
            stored.provider_subscription_ref.as_deref(),
            Some("gid://shopify/AppSubscription/existing")
        );
    }

    #[tokio::test]
    async fn test_missing_shop_session_is_session_missing_without_writes() {
        let f = fixture();
        let merchant = app_store_merchant(&f.merchants, &f.sessions, &acme(), true).await;
        f.sessions
            .delete(&acme().offline_session_id())
            .await
            .unwrap();
        let before = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();

        let err = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::SessionMissing));
        assert_eq!(f.app_store.created(), 0);
        let after = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_one_subscription() {
        let f = fixture();
        let merchant = direct_merchant(&f.merchants, "ops@acme.example", true).await;
        f.direct_pay.set_delay(Duration::from_millis(50));

        let a = f.reconciler.clone();
        let b = f.reconciler.clone();
        let (ma, mb) = (merchant.clone(), merchant.clone());
        let (ra, rb) = tokio::join!(
            async move {
                a.ensure_subscription(&ma, BillingProvider::DirectPay, &direct_channel())
                    .await
            },
            async move {
                b.ensure_subscription(&mb, BillingProvider::DirectPay, &direct_channel())
                    .await
            },
        );

        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert!(ra.active && rb.active);
        assert_eq!(u8::from(ra.created) + u8::from(rb.created), 1);
        assert_eq!(f.direct_pay.created(), 1);

        let stored = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
        assert!(stored.has_active_subscription());
        assert_eq!(stored.billing_provider, BillingProvider::DirectPay);
    }

    #[tokio::test]
    async fn test_direct_pay_remembers_customer() {
        let f = fixture();
        let merchant = direct_merchant(&f.merchants, "ops@acme.example", true).await;

        f.reconciler
            .ensure_subscription(&merchant, BillingProvider::DirectPay, &direct_channel())
            .await
            .unwrap();

        let stored = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
        assert_eq!(stored.provider_session_ref.as_deref(), Some("cus_ops@acme.example"));
        assert_eq!(f.direct_pay.customers_created(), 1);
    }

    #[tokio::test]
    async fn test_direct_pay_needs_direct_identity() {
        let f = fixture();
        let merchant = direct_merchant(&f.merchants, "ops@acme.example", true).await;

        let err = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::DirectPay, &app_channel())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::SessionMissing));
        assert_eq!(f.direct_pay.created(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_linked_subscription_is_replaced() {
        let f = fixture();
        let merchant = direct_merchant(&f.merchants, "ops@acme.example", true).await;
        f.reconciler
            .ensure_subscription(&merchant, BillingProvider::DirectPay, &direct_channel())
            .await
            .unwrap();
        f.direct_pay.cancel_all();

        let outcome = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::DirectPay, &direct_channel())
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(f.direct_pay.created(), 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_after_create() {
        let f = fixture();
        let merchant = direct_merchant(&f.merchants, "ops@acme.example", true).await;
        // Customer lookup writes first; fail only the link
        f.merchants.fail_links(true);

        let err = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::DirectPay, &direct_channel())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BillingError::PersistenceFailure {
                provider: BillingProvider::DirectPay,
                ..
            }
        ));
        assert_eq!(f.direct_pay.created(), 1);
    }

    #[tokio::test]
    async fn test_provider_conflict() {
        let f = fixture();
        let merchant = direct_merchant(&f.merchants, "ops@acme.example", true).await;
        f.reconciler
            .ensure_subscription(&merchant, BillingProvider::DirectPay, &direct_channel())
            .await
            .unwrap();

        let err = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::ProviderConflict {
                current: BillingProvider::DirectPay
            }
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let f = fixture();
        let reconciler = BillingReconciler::new(
            f.merchants.clone(),
            f.sessions.clone(),
            None,
            Some(f.direct_pay.clone()),
            "https://app.sigshield.test",
        );
        let merchant = app_store_merchant(&f.merchants, &f.sessions, &acme(), true).await;

        let err = reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::NotConfigured(BillingProvider::AppStore)
        ));
    }

    #[tokio::test]
    async fn test_refresh_clears_cancelled_subscription() {
        let f = fixture();
        let merchant = direct_merchant(&f.merchants, "ops@acme.example", true).await;
        f.reconciler
            .ensure_subscription(&merchant, BillingProvider::DirectPay, &direct_channel())
            .await
            .unwrap();
        f.direct_pay.cancel_all();

        let status = f.reconciler.refresh_status(&merchant).await.unwrap();
        assert!(!status.active);
        let stored = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
        assert!(stored.provider_subscription_ref.is_none());
    }

    #[tokio::test]
    async fn test_apply_remote_status() {
        let f = fixture();
        let merchant = app_store_merchant(&f.merchants, &f.sessions, &acme(), true).await;
        let outcome = f
            .reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap();
        assert!(outcome.created);
        let pending = f
            .merchants
            .get_by_id(merchant.id)
            .await
            .unwrap()
            .unwrap()
            .pending_subscription_ref
            .unwrap();

        let changed = f
            .reconciler
            .apply_remote_status(
                merchant.id,
                BillingProvider::AppStore,
                &pending,
                RemoteSubscriptionStatus::Active,
            )
            .await
            .unwrap();
        assert!(changed);

        let changed = f
            .reconciler
            .apply_remote_status(
                merchant.id,
                BillingProvider::AppStore,
                &pending,
                RemoteSubscriptionStatus::Inactive,
            )
            .await
            .unwrap();
        assert!(changed);
        let stored = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
        assert!(!stored.has_active_subscription());
    }

    #[tokio::test]
    async fn test_forget_app_store_drops_session_and_linkage() {
        let f = fixture();
        let merchant = app_store_merchant(&f.merchants, &f.sessions, &acme(), true).await;
        f.app_store
            .insert_active("gid://shopify/AppSubscription/1");
        f.reconciler
            .ensure_subscription(&merchant, BillingProvider::AppStore, &app_channel())
            .await
            .unwrap();

        f.reconciler.forget_app_store(&merchant).await.unwrap();

        let stored = f.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
        assert!(stored.provider_subscription_ref.is_none());
        assert!(stored.provider_session_ref.is_none());
        assert!(
            f.sessions
                .get(&acme().offline_session_id())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_manage_url_per_provider() {
        let f = fixture();
        let shop = app_store_merchant(&f.merchants, &f.sessions, &acme(), true).await;
        let url = f.reconciler.manage_url(&shop).await.unwrap();
        assert!(url.contains("acme"));

        let direct = direct_merchant(&f.merchants, "ops@acme.example", true).await;
        let err = f.reconciler.manage_url(&direct).await.unwrap_err();
        assert!(matches!(err, BillingError::SessionMissing));
    }

    #[tokio::test]
    async fn test_deleted_merchant_is_not_found() {
        let f = fixture();
        let merchant = direct_merchant(&f.merchants, "ops@acme.example", true).await;
        f.merchants.remove(merchant.id);

        let err = f.reconciler.refresh_status(&merchant).await.unwrap_err();
        assert!(matches!(err, BillingError::Repository(RepositoryError::NotFound)));
        assert_eq!(
            crate::error::AppError::from(err).status(),
            axum::http::StatusCode::NOT_FOUND
        );
        assert_eq!(f.direct_pay.created(), 0);
    }
}
