//! Shopify app install handshake.
//!
//! - Install: validates the shop, stores a `state` nonce in the session and
//!   redirects to Shopify's authorization page. When the shop is already
//!   installed and the request is signed by Shopify (the admin opening the
//!   app), the shop cookie is re-issued instead.
//! - Callback: verifies the query HMAC and `state`, exchanges the code for
//!   an offline token, saves it, upserts the merchant and issues the signed
//!   shop cookie.

use axum::{
    extract::{RawQuery, State},
    http::{
        StatusCode,
        header::{LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Redirect, Response},
};
use rand::Rng;
use secrecy::SecretString;
use tower_sessions::Session;

use sigshield_core::ShopDomain;

use crate::access::policy::{APP_PATH, ONBOARDING_PATH};
use crate::billing::shopify::verify_query_hmac;
use crate::billing::{AppStoreApi, BillingError};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::models::{Merchant, NewMerchant, session_keys};
use crate::state::AppState;

/// Path Shopify redirects to after the merchant grants access.
pub const CALLBACK_PATH: &str = "/auth/shopify/callback";

/// Maximum age of a signed install request, in seconds.
const INSTALL_REQUEST_MAX_AGE: i64 = 5 * 60;

/// Decoded query parameters, in request order.
fn query_pairs(raw: Option<&str>) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

fn param<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn shopify(state: &AppState) -> Result<(&dyn AppStoreApi, &SecretString)> {
    match (state.app_store(), state.config().shopify.as_ref()) {
        (Some(api), Some(config)) => Ok((api, &config.api_secret)),
        _ => Err(AppError::NotFound("Shopify is not enabled".to_string())),
    }
}

fn parse_shop(pairs: &[(String, String)]) -> Result<ShopDomain> {
    let shop = param(pairs, "shop")
        .ok_or_else(|| AppError::BadRequest("missing shop parameter".to_string()))?;
    ShopDomain::parse(shop).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Whether a query carries a valid Shopify signature with a fresh timestamp.
fn is_signed_by_shopify(pairs: &[(String, String)], secret: &SecretString, now: i64) -> bool {
    let fresh = param(pairs, "timestamp")
        .and_then(|t| t.parse::<i64>().ok())
        .is_some_and(|t| now.abs_diff(t) <= INSTALL_REQUEST_MAX_AGE.unsigned_abs());
    fresh && verify_query_hmac(pairs, secret)
}

fn generate_state() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Redirect into the app with a fresh shop cookie.
fn enter_app(state: &AppState, merchant: &Merchant, shop: &ShopDomain, now: i64) -> Response {
    let cookie = state.bridge().cookies().issue(shop, now);
    let target = if merchant.onboarding_completed {
        APP_PATH
    } else {
        ONBOARDING_PATH
    };
    (
        StatusCode::FOUND,
        [
            (SET_COOKIE, cookie.to_string()),
            (LOCATION, target.to_string()),
        ],
    )
        .into_response()
}

/// Begin (or short-circuit) the install handshake.
///
/// # Route
///
/// `GET /auth/shopify/install?shop=...`
///
/// # Errors
///
/// Returns `AppError::BadRequest` for a missing or invalid shop domain.
#[tracing::instrument(skip_all)]
pub async fn install(
    State(state): State<AppState>,
    session: Session,
    RawQuery(raw): RawQuery,
) -> Result<Response> {
    let (api, secret) = shopify(&state)?;
    let pairs = query_pairs(raw.as_deref());
    let shop = parse_shop(&pairs)?;
    let now = chrono::Utc::now().timestamp();

    // Already installed: Shopify's signature proves the admin sent us here
    if is_signed_by_shopify(&pairs, secret, now)
        && state
            .shop_sessions()
            .get(&shop.offline_session_id())
            .await?
            .is_some()
        && let Some(merchant) = state.merchants().get_by_shop_domain(&shop).await?
    {
        tracing::debug!(%shop, "Re-entering installed shop");
        return Ok(enter_app(&state, &merchant, &shop, now));
    }

    let oauth_state = generate_state();
    session
        .insert(session_keys::OAUTH_STATE, &oauth_state)
        .await
        .map_err(|e| AppError::Internal(format!("failed to store OAuth state: {e}")))?;
    session
        .insert(session_keys::OAUTH_SHOP, shop.as_str())
        .await
        .map_err(|e| AppError::Internal(format!("failed to store OAuth shop: {e}")))?;

    let redirect_uri = state.config().url_for(CALLBACK_PATH);
    let auth_url = api.authorization_url(&shop, &oauth_state, &redirect_uri);

    tracing::info!(%shop, "Starting Shopify install");
    Ok(Redirect::to(&auth_url).into_response())
}

/// Complete the install handshake.
///
/// # Route
///
/// `GET /auth/shopify/callback`
///
/// # Errors
///
/// - `Unauthorized` if the HMAC or `state` does not check out
/// - `BadRequest` for missing parameters
/// - `Billing` if the code exchange fails
#[tracing::instrument(skip_all)]
pub async fn callback(
    State(state): State<AppState>,
    session: Session,
    RawQuery(raw): RawQuery,
) -> Result<Response> {
    let (api, secret) = shopify(&state)?;
    let pairs = query_pairs(raw.as_deref());

    if !verify_query_hmac(&pairs, secret) {
        tracing::warn!("Shopify callback HMAC mismatch");
        return Err(AppError::Unauthorized("invalid Shopify signature".to_string()));
    }

    let shop = parse_shop(&pairs)?;
    let code = param(&pairs, "code")
        .ok_or_else(|| AppError::BadRequest("missing code parameter".to_string()))?;
    let returned_state = param(&pairs, "state")
        .ok_or_else(|| AppError::BadRequest("missing state parameter".to_string()))?;

    // One-time use
    let stored_state: Option<String> = session
        .remove(session_keys::OAUTH_STATE)
        .await
        .ok()
        .flatten();
    let stored_shop: Option<String> = session
        .remove(session_keys::OAUTH_SHOP)
        .await
        .ok()
        .flatten();

    if stored_state.as_deref() != Some(returned_state) || stored_shop.as_deref() != Some(shop.as_str())
    {
        tracing::warn!(%shop, "Shopify callback state mismatch");
        return Err(AppError::Unauthorized("install session expired".to_string()));
    }

    let shop_session = api
        .exchange_code(&shop, code)
        .await
        .map_err(BillingError::from)?;
    state.shop_sessions().save(&shop_session).await?;

    let merchant = state
        .merchants()
        .upsert_merchant(&NewMerchant::AppStore {
            shop_domain: shop.clone(),
            session_ref: shop_session.id.clone(),
        })
        .await?;

    tracing::info!(%shop, merchant_id = %merchant.id, "Shopify install completed");
    add_breadcrumb("auth", "Shopify install completed", Some(&[("shop", shop.as_str())]));

    let now = chrono::Utc::now().timestamp();
    Ok(enter_app(&state, &merchant, &shop, now))
}
