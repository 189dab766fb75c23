//! Provider webhooks.
//!
//! Both endpoints verify the delivery signature over the raw body before
//! parsing anything. Deliveries for unknown merchants or topics are
//! acknowledged so providers stop retrying them.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;

use sigshield_core::{BillingProvider, RemoteSubscriptionStatus, ShopDomain};

use crate::billing::{shopify, stripe};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Header carrying the base64 HMAC of a Shopify delivery.
pub const SHOPIFY_HMAC_HEADER: &str = "x-shopify-hmac-sha256";
/// Header naming a Shopify delivery's topic.
pub const SHOPIFY_TOPIC_HEADER: &str = "x-shopify-topic";
/// Header naming the shop a Shopify delivery is about.
pub const SHOPIFY_SHOP_HEADER: &str = "x-shopify-shop-domain";
/// Header carrying a Stripe delivery's signature.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[derive(Debug, Deserialize)]
struct AppSubscriptionUpdate {
    app_subscription: AppSubscriptionPayload,
}

#[derive(Debug, Deserialize)]
struct AppSubscriptionPayload {
    admin_graphql_api_id: String,
    status: String,
}

/// Receive a Shopify webhook.
///
/// # Route
///
/// `POST /webhooks/shopify`
///
/// # Errors
///
/// - `Unauthorized` for a missing or bad signature
/// - `BadRequest` for a malformed payload
/// - `Billing` / `Database` if applying the change fails (Shopify retries)
#[tracing::instrument(skip_all, fields(topic))]
pub async fn shopify_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let secret = state
        .config()
        .shopify
        .as_ref()
        .map(|config| &config.api_secret)
        .ok_or_else(|| AppError::NotFound("Shopify is not enabled".to_string()))?;

    let signature = header(&headers, SHOPIFY_HMAC_HEADER).unwrap_or_default();
    if !shopify::verify_webhook_hmac(&body, signature, secret) {
        tracing::warn!("Shopify webhook signature mismatch");
        return Err(AppError::Unauthorized("invalid webhook signature".to_string()));
    }

    let topic = header(&headers, SHOPIFY_TOPIC_HEADER).unwrap_or_default();
    tracing::Span::current().record("topic", topic);

    let shop = header(&headers, SHOPIFY_SHOP_HEADER)
        .and_then(|shop| ShopDomain::parse(shop).ok())
        .ok_or_else(|| AppError::BadRequest("missing shop domain".to_string()))?;
    let Some(merchant) = state.merchants().get_by_shop_domain(&shop).await? else {
        tracing::debug!(%shop, "Webhook for unknown shop");
        return Ok(StatusCode::OK);
    };

    match topic {
        "app_subscriptions/update" => {
            let update: AppSubscriptionUpdate = serde_json::from_slice(&body)
                .map_err(|e| AppError::BadRequest(format!("invalid payload: {e}")))?;
            let status = shopify::parse_subscription_status(&update.app_subscription.status);
            let changed = state
                .reconciler()
                .apply_remote_status(
                    merchant.id,
                    BillingProvider::AppStore,
                    &update.app_subscription.admin_graphql_api_id,
                    status,
                )
                .await?;
            tracing::info!(
                merchant_id = %merchant.id,
                status = %update.app_subscription.status,
                changed,
                "Applied app subscription update"
            );
        }
        "app/uninstalled" => {
            state.reconciler().forget_app_store(&merchant).await?;
            tracing::info!(merchant_id = %merchant.id, "Shop uninstalled app");
        }
        other => tracing::debug!(topic = other, "Ignoring Shopify webhook"),
    }

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeSubscriptionObject,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionObject {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

/// Receive a Stripe webhook.
///
/// # Route
///
/// `POST /webhooks/stripe`
///
/// # Errors
///
/// - `Unauthorized` for a missing, bad or stale signature
/// - `Billing` / `Database` if applying the change fails (Stripe retries)
#[tracing::instrument(skip_all)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let secret = state
        .config()
        .stripe
        .as_ref()
        .map(|config| &config.webhook_secret)
        .ok_or_else(|| AppError::NotFound("Stripe is not enabled".to_string()))?;

    let signature = header(&headers, STRIPE_SIGNATURE_HEADER).unwrap_or_default();
    let now = chrono::Utc::now().timestamp();
    if !stripe::verify_webhook_signature(&body, signature, secret, now) {
        tracing::warn!("Stripe webhook signature mismatch");
        return Err(AppError::Unauthorized("invalid webhook signature".to_string()));
    }

    // Only subscription events matter; anything else may have another shape
    let event_type = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| value.get("type").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_default();
    if !matches!(
        event_type.as_str(),
        "customer.subscription.updated" | "customer.subscription.deleted"
    ) {
        tracing::debug!(event_type = %event_type, "Ignoring Stripe webhook");
        return Ok(StatusCode::OK);
    }

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid payload: {e}")))?;
    let subscription = event.data.object;

    let Some(merchant) = state
        .merchants()
        .get_by_subscription_ref(&subscription.id)
        .await?
    else {
        tracing::debug!(reference = %subscription.id, "Webhook for unknown subscription");
        return Ok(StatusCode::OK);
    };

    let status = if event.event_type == "customer.subscription.deleted" {
        RemoteSubscriptionStatus::Inactive
    } else {
        subscription
            .status
            .as_deref()
            .map_or(RemoteSubscriptionStatus::Inactive, stripe::parse_subscription_status)
    };

    let changed = state
        .reconciler()
        .apply_remote_status(merchant.id, BillingProvider::DirectPay, &subscription.id, status)
        .await?;
    tracing::info!(
        merchant_id = %merchant.id,
        event_type = %event.event_type,
        changed,
        "Applied Stripe subscription event"
    );

    Ok(StatusCode::OK)
}
