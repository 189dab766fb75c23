//! Shopify Admin API client for the install handshake and app subscriptions.
//!
//! Queries are plain GraphQL documents posted with `serde_json` variables;
//! only the handful of billing fields we read are modelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use sha2::Sha256;
use tracing::instrument;

use sigshield_core::{RemoteSubscriptionStatus, ShopDomain};

use super::{AppStoreApi, CreatedSubscription, ProviderError};
use crate::config::{ShopifyConfig, ShopifyPlan};
use crate::models::ShopSession;

type HmacSha256 = Hmac<Sha256>;

const ACTIVE_SUBSCRIPTIONS_QUERY: &str = r"
query ActiveSubscriptions {
  currentAppInstallation {
    activeSubscriptions { id status }
  }
}
";

const SUBSCRIPTION_STATUS_QUERY: &str = r"
query SubscriptionStatus($id: ID!) {
  node(id: $id) {
    ... on AppSubscription { id status }
  }
}
";

const SUBSCRIPTION_CREATE_MUTATION: &str = r"
mutation AppSubscriptionCreate(
  $name: String!
  $returnUrl: URL!
  $trialDays: Int
  $test: Boolean
  $lineItems: [AppSubscriptionLineItemInput!]!
) {
  appSubscriptionCreate(
    name: $name
    returnUrl: $returnUrl
    trialDays: $trialDays
    test: $test
    lineItems: $lineItems
  ) {
    appSubscription { id status }
    confirmationUrl
    userErrors { field message }
  }
}
";

// =============================================================================
// Response Types
// =============================================================================

/// GraphQL response wrapper.
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLErrorResponse>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSubscriptionsData {
    current_app_installation: AppInstallation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppInstallation {
    #[serde(default)]
    active_subscriptions: Vec<AppSubscription>,
}

#[derive(Debug, Deserialize)]
struct AppSubscription {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionStatusData {
    node: Option<SubscriptionNode>,
}

/// `node(id:)` yields an empty object for ids that are not app subscriptions.
#[derive(Debug, Deserialize)]
struct SubscriptionNode {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionCreateData {
    app_subscription_create: SubscriptionCreatePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionCreatePayload {
    app_subscription: Option<AppSubscription>,
    confirmation_url: Option<String>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct UserError {
    message: String,
}

/// OAuth token response from Shopify.
#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    scope: String,
}

// =============================================================================
// Client
// =============================================================================

/// Shopify app-store billing client.
#[derive(Clone)]
pub struct ShopifyBilling {
    inner: Arc<ShopifyBillingInner>,
}

struct ShopifyBillingInner {
    client: reqwest::Client,
    api_key: String,
    api_secret: SecretString,
    api_version: String,
    app_handle: String,
    scopes: Vec<String>,
    plan: ShopifyPlan,
}

impl ShopifyBilling {
    /// Create a new client. Every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be built.
    pub fn new(config: &ShopifyConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(ShopifyBillingInner {
                client,
                api_key: config.api_key.clone(),
                api_secret: config.api_secret.clone(),
                api_version: config.api_version.clone(),
                app_handle: config.app_handle.clone(),
                scopes: config.scopes.clone(),
                plan: config.plan.clone(),
            }),
        })
    }

    /// Execute a GraphQL document with the shop's offline token.
    async fn execute<T: DeserializeOwned>(
        &self,
        session: &ShopSession,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let endpoint = format!(
            "https://{}/admin/api/{}/graphql.json",
            session.shop, self.inner.api_version
        );

        let response = self
            .inner
            .client
            .post(&endpoint)
            .header("X-Shopify-Access-Token", session.access_token.expose_secret())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            return Err(ProviderError::Unavailable(format!(
                "rate limited, retry after {retry_after}s"
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::Unauthorized);
        }
        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!("Shopify returned {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "Shopify returned {status}: {text}"
            )));
        }

        let body: GraphQLResponse<T> = response.json().await?;
        unwrap_graphql(body)
    }
}

fn unwrap_graphql<T>(body: GraphQLResponse<T>) -> Result<T, ProviderError> {
    if let Some(errors) = body.errors
        && !errors.is_empty()
    {
        let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
        return Err(ProviderError::InvalidResponse(messages.join("; ")));
    }
    body.data
        .ok_or_else(|| ProviderError::InvalidResponse("no data in response".to_string()))
}

#[async_trait]
impl AppStoreApi for ShopifyBilling {
    fn authorization_url(&self, shop: &ShopDomain, state: &str, redirect_uri: &str) -> String {
        let scope = self.inner.scopes.join(",");
        format!(
            "https://{}/admin/oauth/authorize?client_id={}&scope={}&redirect_uri={}&state={}",
            shop,
            urlencoding::encode(&self.inner.api_key),
            urlencoding::encode(&scope),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        )
    }

    #[instrument(skip(self, code), fields(shop = %shop))]
    async fn exchange_code(
        &self,
        shop: &ShopDomain,
        code: &str,
    ) -> Result<ShopSession, ProviderError> {
        let url = format!("https://{shop}/admin/oauth/access_token");

        let params = [
            ("client_id", self.inner.api_key.as_str()),
            ("client_secret", self.inner.api_secret.expose_secret()),
            ("code", code),
        ];

        let response = self.inner.client.post(&url).form(&params).send().await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!("Shopify returned {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!(
                "token exchange failed: {text}"
            )));
        }

        let token: OAuthTokenResponse = response.json().await?;
        let scopes = token
            .scope
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(ShopSession::offline(
            shop.clone(),
            SecretString::from(token.access_token),
            scopes,
        ))
    }

    #[instrument(skip(self, session), fields(shop = %session.shop))]
    async fn find_active_subscription(
        &self,
        session: &ShopSession,
    ) -> Result<Option<String>, ProviderError> {
        let data: ActiveSubscriptionsData = self
            .execute(session, ACTIVE_SUBSCRIPTIONS_QUERY, json!({}))
            .await?;

        Ok(data
            .current_app_installation
            .active_subscriptions
            .into_iter()
            .find(|s| parse_subscription_status(&s.status).is_active())
            .map(|s| s.id))
    }

    #[instrument(skip(self, session), fields(shop = %session.shop))]
    async fn subscription_status(
        &self,
        session: &ShopSession,
        reference: &str,
    ) -> Result<RemoteSubscriptionStatus, ProviderError> {
        let data: SubscriptionStatusData = self
            .execute(session, SUBSCRIPTION_STATUS_QUERY, json!({ "id": reference }))
            .await?;

        Ok(data
            .node
            .and_then(|n| n.status)
            .map_or(RemoteSubscriptionStatus::Inactive, |s| {
                parse_subscription_status(&s)
            }))
    }

    #[instrument(skip(self, session), fields(shop = %session.shop))]
    async fn create_subscription(
        &self,
        session: &ShopSession,
        return_url: &str,
    ) -> Result<CreatedSubscription, ProviderError> {
        let plan = &self.inner.plan;
        let variables = json!({
            "name": plan.name,
            "returnUrl": return_url,
            "trialDays": plan.trial_days,
            "test": plan.test,
            "lineItems": [{
                "plan": {
                    "appRecurringPricingDetails": {
                        "price": {
                            "amount": plan.price.to_string(),
                            "currencyCode": plan.currency,
                        },
                        "interval": "EVERY_30_DAYS",
                    }
                }
            }],
        });

        let data: SubscriptionCreateData = self
            .execute(session, SUBSCRIPTION_CREATE_MUTATION, variables)
            .await?;
        created_from_payload(data.app_subscription_create)
    }

    fn manage_url(&self, shop: &ShopDomain) -> String {
        format!(
            "https://admin.shopify.com/store/{}/charges/{}/pricing_plans",
            shop.handle(),
            self.inner.app_handle
        )
    }
}

fn created_from_payload(
    payload: SubscriptionCreatePayload,
) -> Result<CreatedSubscription, ProviderError> {
    if !payload.user_errors.is_empty() {
        let messages: Vec<String> = payload.user_errors.into_iter().map(|e| e.message).collect();
        return Err(ProviderError::Rejected(messages.join("; ")));
    }

    let subscription = payload.app_subscription.ok_or_else(|| {
        ProviderError::InvalidResponse("appSubscriptionCreate returned no subscription".to_string())
    })?;

    Ok(CreatedSubscription {
        reference: subscription.id,
        confirmation_url: payload.confirmation_url,
    })
}

/// Map a Shopify `AppSubscriptionStatus` to our view of it.
///
/// `ACCEPTED` is an approved charge Shopify has not activated yet.
#[must_use]
pub fn parse_subscription_status(status: &str) -> RemoteSubscriptionStatus {
    match status.to_ascii_uppercase().as_str() {
        "ACTIVE" => RemoteSubscriptionStatus::Active,
        "PENDING" | "ACCEPTED" => RemoteSubscriptionStatus::Pending,
        _ => RemoteSubscriptionStatus::Inactive,
    }
}

// =============================================================================
// HMAC Verification
// =============================================================================

/// Verify the `hmac` parameter of a Shopify redirect (install or callback).
///
/// The message is every other parameter except `signature`, sorted by key
/// and joined as `key=value` with `&`.
#[must_use]
pub fn verify_query_hmac(params: &[(String, String)], secret: &SecretString) -> bool {
    let Some(provided) = params
        .iter()
        .find(|(k, _)| k == "hmac")
        .and_then(|(_, v)| hex::decode(v).ok())
    else {
        return false;
    };

    let mut pairs: Vec<&(String, String)> = params
        .iter()
        .filter(|(k, _)| k != "hmac" && k != "signature")
        .collect();
    pairs.sort();

    let message = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Verify the `X-Shopify-Hmac-Sha256` header of a webhook delivery.
#[must_use]
pub fn verify_webhook_hmac(body: &[u8], header: &str, secret: &SecretString) -> bool {
    let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(header.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn client() -> ShopifyBilling {
        let config = ShopifyConfig {
            api_key: "client id".to_string(),
            api_secret: SecretString::from("hush"),
            app_handle: "sigshield".to_string(),
            scopes: vec!["read_orders".to_string(), "read_fulfillments".to_string()],
            api_version: "2026-01".to_string(),
            plan: ShopifyPlan {
                name: "Pro".to_string(),
                price: Decimal::new(1900, 2),
                currency: "USD".to_string(),
                trial_days: 0,
                test: true,
            },
        };
        ShopifyBilling::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn sign_query(message: &str, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_parse_subscription_status() {
        assert_eq!(
            parse_subscription_status("ACTIVE"),
            RemoteSubscriptionStatus::Active
        );
        assert_eq!(
            parse_subscription_status("pending"),
            RemoteSubscriptionStatus::Pending
        );
        assert_eq!(
            parse_subscription_status("ACCEPTED"),
            RemoteSubscriptionStatus::Pending
        );
        for status in ["CANCELLED", "DECLINED", "EXPIRED", "FROZEN", "???"] {
            assert_eq!(
                parse_subscription_status(status),
                RemoteSubscriptionStatus::Inactive
            );
        }
    }

    #[test]
    fn test_authorization_url_encodes_params() {
        let shop = ShopDomain::parse("acme.myshopify.com").unwrap();
        let url = client().authorization_url(
            &shop,
            "nonce-1",
            "https://app.sigshield.io/auth/shopify/callback",
        );
        assert!(url.starts_with("https://acme.myshopify.com/admin/oauth/authorize?"));
        assert!(url.contains("client_id=client%20id"));
        assert!(url.contains("scope=read_orders%2Cread_fulfillments"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.sigshield.io%2Fauth%2Fshopify%2Fcallback"));
        assert!(url.ends_with("state=nonce-1"));
    }

    #[test]
    fn test_manage_url_uses_handles() {
        let shop = ShopDomain::parse("acme.myshopify.com").unwrap();
        assert_eq!(
            client().manage_url(&shop),
            "https://admin.shopify.com/store/acme/charges/sigshield/pricing_plans"
        );
    }

    #[test]
    fn test_verify_query_hmac() {
        let secret = SecretString::from("hush");
        let message = "code=abc&shop=acme.myshopify.com&state=n1&timestamp=1700000000";
        let mut params = vec![
            ("shop".to_string(), "acme.myshopify.com".to_string()),
            ("code".to_string(), "abc".to_string()),
            ("timestamp".to_string(), "1700000000".to_string()),
            ("state".to_string(), "n1".to_string()),
            ("hmac".to_string(), sign_query(message, "hush")),
        ];
        assert!(verify_query_hmac(&params, &secret));

        // Tampered value
        if let Some(p) = params.iter_mut().find(|(k, _)| k == "shop") {
            p.1 = "evil.myshopify.com".to_string();
        }
        assert!(!verify_query_hmac(&params, &secret));
    }

    #[test]
    fn test_verify_query_hmac_requires_hmac() {
        let params = vec![("shop".to_string(), "acme.myshopify.com".to_string())];
        assert!(!verify_query_hmac(&params, &SecretString::from("hush")));
    }

    #[test]
    fn test_verify_webhook_hmac() {
        let body = br#"{"app_subscription":{"status":"ACTIVE"}}"#;
        let mut mac = HmacSha256::new_from_slice(b"hush").unwrap();
        mac.update(body);
        let header = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        let secret = SecretString::from("hush");
        assert!(verify_webhook_hmac(body, &header, &secret));
        assert!(!verify_webhook_hmac(b"{}", &header, &secret));
        assert!(!verify_webhook_hmac(body, "not base64!", &secret));
    }

    #[test]
    fn test_create_payload_user_errors_are_rejections() {
        let payload: SubscriptionCreatePayload = serde_json::from_value(json!({
            "appSubscription": null,
            "confirmationUrl": null,
            "userErrors": [{ "field": ["price"], "message": "Price must be positive" }]
        }))
        .unwrap();
        assert!(matches!(
            created_from_payload(payload),
            Err(ProviderError::Rejected(msg)) if msg == "Price must be positive"
        ));
    }

    #[test]
    fn test_create_payload_returns_confirmation_url() {
        let payload: SubscriptionCreatePayload = serde_json::from_value(json!({
            "appSubscription": { "id": "gid://shopify/AppSubscription/7", "status": "PENDING" },
            "confirmationUrl": "https://acme.myshopify.com/admin/charges/7/confirm",
            "userErrors": []
        }))
        .unwrap();
        let created = created_from_payload(payload).unwrap();
        assert_eq!(created.reference, "gid://shopify/AppSubscription/7");
        assert!(created.confirmation_url.is_some());
    }

    #[test]
    fn test_graphql_errors_surface() {
        let body: GraphQLResponse<SubscriptionStatusData> = serde_json::from_value(json!({
            "data": null,
            "errors": [{ "message": "Throttled" }]
        }))
        .unwrap();
        assert!(matches!(
            unwrap_graphql(body),
            Err(ProviderError::InvalidResponse(msg)) if msg == "Throttled"
        ));
    }

    #[test]
    fn test_status_node_for_other_type_is_inactive() {
        let data: SubscriptionStatusData =
            serde_json::from_value(json!({ "node": {} })).unwrap();
        assert!(data.node.and_then(|n| n.status).is_none());
    }
}
