//! Direct-signup sign-in callback and logout.

use axum::{
    extract::State,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use tower_sessions::Session;
use tower_sessions::cookie::{Cookie, time::Duration};

use crate::access::policy::{APP_PATH, LOGIN_PATH, ONBOARDING_PATH};
use crate::error::{Result, add_breadcrumb, clear_sentry_user};
use crate::identity::verifier::AUTH_COOKIE_NAME;
use crate::models::NewMerchant;
use crate::state::AppState;

/// Landing point after the hosted auth service signs a merchant in.
///
/// Creates the merchant on first sign-in. Requests without a verified
/// identity are sent back to the login page.
///
/// # Route
///
/// `GET /auth/callback`
///
/// # Errors
///
/// Returns `AppError::Auth` if the auth service is down, or
/// `AppError::Database` if the merchant cannot be saved.
#[tracing::instrument(skip_all)]
pub async fn callback(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let Some(identity) = state.bridge().verifier().verify(&headers).await? else {
        tracing::debug!("Sign-in callback without a verified identity");
        return Ok((StatusCode::FOUND, [(LOCATION, LOGIN_PATH)]).into_response());
    };

    let merchant = state
        .merchants()
        .upsert_merchant(&NewMerchant::Direct {
            email: identity.email.clone(),
            has_password: identity.has_password,
            email_login: identity.email_login,
        })
        .await?;

    tracing::info!(merchant_id = %merchant.id, "Direct sign-in completed");
    add_breadcrumb("auth", "Direct sign-in completed", None);

    let target = if merchant.onboarding_completed {
        APP_PATH
    } else {
        ONBOARDING_PATH
    };
    Ok((StatusCode::FOUND, [(LOCATION, target)]).into_response())
}

/// End every identity the browser holds.
///
/// Expires the shop and auth cookies, revokes the access token at the auth
/// service and drops the server session. Revocation failures are logged;
/// the cookies are cleared regardless.
///
/// # Route
///
/// `POST /auth/logout`
pub async fn logout(State(state): State<AppState>, session: Session, headers: HeaderMap) -> Response {
    if let Err(e) = state.bridge().verifier().revoke(&headers).await {
        tracing::warn!(error = %e, "Failed to revoke access token");
    }
    if let Err(e) = session.flush().await {
        tracing::warn!(error = %e, "Failed to flush session");
    }
    clear_sentry_user();

    let shop_cookie = state.bridge().cookies().clear();
    let auth_cookie = Cookie::build((AUTH_COOKIE_NAME, ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build();

    let mut response = StatusCode::NO_CONTENT.into_response();
    for cookie in [shop_cookie, auth_cookie] {
        if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}
