//! Stripe REST client for direct-signup billing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use sha2::Sha256;
use tracing::instrument;

use sigshield_core::{Email, RemoteSubscriptionStatus};

use super::{CreatedSubscription, DirectPayApi, ProviderError};
use crate::config::StripeConfig;

type HmacSha256 = Hmac<Sha256>;

/// Production API base.
pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Webhook deliveries older than this are refused.
const WEBHOOK_TOLERANCE_SECS: i64 = 300;

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PortalSession {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// Stripe billing client.
#[derive(Clone)]
pub struct StripeBilling {
    inner: Arc<StripeBillingInner>,
}

struct StripeBillingInner {
    client: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
    price_id: String,
}

impl StripeBilling {
    /// Create a client for the production Stripe API.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_api_base(config, timeout, STRIPE_API_BASE)
    }

    /// Create a client against another API base (e.g. `stripe-mock`).
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be built.
    pub fn with_api_base(
        config: &StripeConfig,
        timeout: Duration,
        api_base: &str,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(StripeBillingInner {
                client,
                api_base: api_base.trim_end_matches('/').to_string(),
                secret_key: config.secret_key.clone(),
                price_id: config.price_id.clone(),
            }),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.inner.api_base)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ProviderError> {
        let response = self
            .inner
            .client
            .get(self.url(path))
            .bearer_auth(self.inner.secret_key.expose_secret())
            .query(query)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        Ok(Some(response.json().await?))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
        idempotency_key: Option<&str>,
    ) -> Result<T, ProviderError> {
        let mut request = self
            .inner
            .client
            .post(self.url(path))
            .bearer_auth(self.inner.secret_key.expose_secret())
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Classify a non-success Stripe response.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.error.message)
        .unwrap_or(text);

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(ProviderError::Unavailable(format!(
            "Stripe returned {status}: {message}"
        )));
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        // Our API key, not the merchant's session
        tracing::error!("Stripe rejected the configured API key");
        return Err(ProviderError::Unavailable(
            "Stripe rejected the API key".to_string(),
        ));
    }
    Err(ProviderError::Rejected(message))
}

#[async_trait]
impl DirectPayApi for StripeBilling {
    #[instrument(skip(self, email))]
    async fn find_or_create_customer(&self, email: &Email) -> Result<String, ProviderError> {
        let existing: Option<List<StripeCustomer>> = self
            .get("customers", &[("email", email.as_str()), ("limit", "1")])
            .await?;
        if let Some(customer) = existing.and_then(|list| list.data.into_iter().next()) {
            return Ok(customer.id);
        }

        let key = format!("sigshield-customer-{email}");
        let customer: StripeCustomer = self
            .post("customers", &[("email", email.as_str())], Some(&key))
            .await?;
        tracing::info!(customer = %customer.id, "Created Stripe customer");
        Ok(customer.id)
    }

    #[instrument(skip(self))]
    async fn find_active_subscription(
        &self,
        customer: &str,
    ) -> Result<Option<String>, ProviderError> {
        let list: Option<List<StripeSubscription>> = self
            .get(
                "subscriptions",
                &[
                    ("customer", customer),
                    ("price", self.inner.price_id.as_str()),
                    ("status", "all"),
                    ("limit", "10"),
                ],
            )
            .await?;

        Ok(list.and_then(|list| {
            list.data
                .into_iter()
                .find(|s| parse_subscription_status(&s.status).is_active())
                .map(|s| s.id)
        }))
    }

    #[instrument(skip(self))]
    async fn subscription_status(
        &self,
        reference: &str,
    ) -> Result<RemoteSubscriptionStatus, ProviderError> {
        let subscription: Option<StripeSubscription> =
            self.get(&format!("subscriptions/{reference}"), &[]).await?;

        Ok(subscription.map_or(RemoteSubscriptionStatus::Inactive, |s| {
            parse_subscription_status(&s.status)
        }))
    }

    #[instrument(skip(self))]
    async fn create_subscription(
        &self,
        customer: &str,
        idempotency_key: &str,
    ) -> Result<CreatedSubscription, ProviderError> {
        let subscription: StripeSubscription = self
            .post(
                "subscriptions",
                &[
                    ("customer", customer),
                    ("items[0][price]", self.inner.price_id.as_str()),
                    ("payment_behavior", "error_if_incomplete"),
                ],
                Some(idempotency_key),
            )
            .await?;

        Ok(CreatedSubscription {
            reference: subscription.id,
            confirmation_url: None,
        })
    }

    #[instrument(skip(self))]
    async fn portal_url(&self, customer: &str, return_url: &str) -> Result<String, ProviderError> {
        let session: PortalSession = self
            .post(
                "billing_portal/sessions",
                &[("customer", customer), ("return_url", return_url)],
                None,
            )
            .await?;
        Ok(session.url)
    }
}

/// Map a Stripe subscription status to our view of it.
///
/// `past_due` keeps access while Stripe retries the payment.
#[must_use]
pub fn parse_subscription_status(status: &str) -> RemoteSubscriptionStatus {
    match status {
        "active" | "trialing" | "past_due" => RemoteSubscriptionStatus::Active,
        "incomplete" => RemoteSubscriptionStatus::Pending,
        _ => RemoteSubscriptionStatus::Inactive,
    }
}

// =============================================================================
// Webhook Verification
// =============================================================================

/// Verify a `Stripe-Signature` header (`t=<ts>,v1=<hex>[,v1=<hex>...]`).
///
/// Any matching `v1` signature is accepted; deliveries more than five
/// minutes away from `now` are refused.
#[must_use]
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &SecretString,
    now: i64,
) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(sig) = hex::decode(value) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    if now.abs_diff(timestamp) > WEBHOOK_TOLERANCE_SECS.unsigned_abs() {
        return false;
    }

    signatures.iter().any(|sig| {
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(sig).is_ok()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        Form, Json, Router,
        extract::{Path, Query},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
    };
    use serde_json::json;

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: SecretString::from("sk_test_123"),
            price_id: "price_pro".to_string(),
            webhook_secret: SecretString::from("whsec_test"),
        }
    }

    fn sign(payload: &[u8], timestamp: i64, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    /// Serve `router` on an ephemeral port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_parse_subscription_status() {
        assert!(parse_subscription_status("active").is_active());
        assert!(parse_subscription_status("trialing").is_active());
        assert!(parse_subscription_status("past_due").is_active());
        assert_eq!(
            parse_subscription_status("incomplete"),
            RemoteSubscriptionStatus::Pending
        );
        assert_eq!(
            parse_subscription_status("canceled"),
            RemoteSubscriptionStatus::Inactive
        );
        assert_eq!(
            parse_subscription_status("incomplete_expired"),
            RemoteSubscriptionStatus::Inactive
        );
    }

    #[test]
    fn test_verify_webhook_signature() {
        let secret = SecretString::from("whsec_test");
        let payload = br#"{"type":"customer.subscription.deleted"}"#;
        let header = sign(payload, 1_700_000_000, "whsec_test");

        assert!(verify_webhook_signature(payload, &header, &secret, 1_700_000_100));
        assert!(!verify_webhook_signature(b"{}", &header, &secret, 1_700_000_100));
        assert!(!verify_webhook_signature(
            payload,
            &header,
            &SecretString::from("whsec_other"),
            1_700_000_100
        ));
    }

    #[test]
    fn test_verify_webhook_signature_rejects_stale() {
        let secret = SecretString::from("whsec_test");
        let payload = b"{}";
        let header = sign(payload, 1_700_000_000, "whsec_test");
        assert!(!verify_webhook_signature(payload, &header, &secret, 1_700_000_301));
    }

    #[test]
    fn test_verify_webhook_signature_accepts_any_v1() {
        let secret = SecretString::from("whsec_test");
        let payload = b"{}";
        let good = sign(payload, 1_700_000_000, "whsec_test");
        let header = format!("{good},v1=deadbeef");
        assert!(verify_webhook_signature(payload, &header, &secret, 1_700_000_000));
        assert!(!verify_webhook_signature(payload, "v1=deadbeef", &secret, 0));
    }

    #[test]
    fn test_verify_webhook_signature_extreme_timestamps() {
        let secret = SecretString::from("whsec_test");
        let payload = b"{}";
        for timestamp in [i64::MIN, i64::MAX] {
            let header = sign(payload, timestamp, "whsec_test");
            assert!(!verify_webhook_signature(payload, &header, &secret, 1_700_000_000));
        }
        assert!(!verify_webhook_signature(
            payload,
            "t=-9223372036854775808,v1=00",
            &secret,
            1_700_000_000
        ));
        assert!(!verify_webhook_signature(payload, "t=9223372036854775807,v1=00", &secret, i64::MIN));
    }

    #[tokio::test]
    async fn test_find_or_create_customer_reuses_existing() {
        let router = Router::new().route(
            "/v1/customers",
            get(|Query(q): Query<Vec<(String, String)>>| async move {
                assert!(q.contains(&("email".to_string(), "ops@acme.example".to_string())));
                Json(json!({ "data": [{ "id": "cus_existing" }] }))
            })
            .post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = serve(router).await;
        let client = StripeBilling::with_api_base(&config(), Duration::from_secs(5), &base).unwrap();

        let email = Email::parse("ops@acme.example").unwrap();
        assert_eq!(
            client.find_or_create_customer(&email).await.unwrap(),
            "cus_existing"
        );
    }

    #[tokio::test]
    async fn test_create_subscription_sends_idempotency_key() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let router = Router::new().route(
            "/v1/subscriptions",
            post(
                |headers: HeaderMap, Form(form): Form<Vec<(String, String)>>| async move {
                    CALLS.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(headers.get("Idempotency-Key").unwrap(), "key-1");
                    assert_eq!(
                        headers.get("Authorization").unwrap(),
                        "Bearer sk_test_123"
                    );
                    assert!(form.contains(&(
                        "items[0][price]".to_string(),
                        "price_pro".to_string()
                    )));
                    Json(json!({ "id": "sub_1", "status": "active" }))
                },
            ),
        );
        let base = serve(router).await;
        let client = StripeBilling::with_api_base(&config(), Duration::from_secs(5), &base).unwrap();

        let created = client.create_subscription("cus_1", "key-1").await.unwrap();
        assert_eq!(created.reference, "sub_1");
        assert!(created.confirmation_url.is_none());
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_card_error_is_rejection() {
        let router = Router::new().route(
            "/v1/subscriptions",
            post(|| async {
                (
                    StatusCode::PAYMENT_REQUIRED,
                    Json(json!({ "error": { "message": "Your card was declined." } })),
                )
            }),
        );
        let base = serve(router).await;
        let client = StripeBilling::with_api_base(&config(), Duration::from_secs(5), &base).unwrap();

        let err = client.create_subscription("cus_1", "key-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(msg) if msg == "Your card was declined."));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let router = Router::new().route(
            "/v1/subscriptions/{id}",
            get(|| async { StatusCode::BAD_GATEWAY }),
        );
        let base = serve(router).await;
        let client = StripeBilling::with_api_base(&config(), Duration::from_secs(5), &base).unwrap();

        let err = client.subscription_status("sub_1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_inactive() {
        let router = Router::new().route(
            "/v1/subscriptions/{id}",
            get(|Path(id): Path<String>| async move {
                if id == "sub_live" {
                    Json(json!({ "id": "sub_live", "status": "trialing" })).into_response()
                } else {
                    StatusCode::NOT_FOUND.into_response()
                }
            }),
        );
        let base = serve(router).await;
        let client = StripeBilling::with_api_base(&config(), Duration::from_secs(5), &base).unwrap();

        assert_eq!(
            client.subscription_status("sub_live").await.unwrap(),
            RemoteSubscriptionStatus::Active
        );
        assert_eq!(
            client.subscription_status("sub_gone").await.unwrap(),
            RemoteSubscriptionStatus::Inactive
        );
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let router = Router::new().route(
            "/v1/subscriptions/{id}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                StatusCode::OK
            }),
        );
        let base = serve(router).await;
        let client =
            StripeBilling::with_api_base(&config(), Duration::from_millis(100), &base).unwrap();

        let err = client.subscription_status("sub_1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
