//! HTTP route handlers for the merchant backend.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                      - Health check (public)
//! GET  /health/ready                - Readiness check (public)
//!
//! # Access
//! GET  /api/access/check?path=      - Gate decision for a path (public)
//!
//! # Merchant (authenticated)
//! GET  /api/merchant                - Current merchant
//! POST /api/onboarding/complete     - Mark onboarding complete
//!
//! # Billing
//! POST /api/billing/subscribe       - Ensure a subscription (onboarding required)
//! GET  /billing/confirm             - Shopify charge return URL (onboarding required)
//! GET  /api/billing/status          - Refresh billing state (onboarding required)
//! GET  /api/billing/manage          - Manage-billing URL (subscription required)
//!
//! # Auth (public)
//! GET  /auth/shopify/install        - Begin Shopify install
//! GET  /auth/shopify/callback       - Finish Shopify install
//! GET  /auth/callback               - Direct sign-in callback
//! POST /auth/logout                 - Logout
//!
//! # Webhooks (public, signature verified)
//! POST /webhooks/shopify            - Shopify app webhooks
//! POST /webhooks/stripe             - Stripe subscription events
//! ```
//!
//! Access tiers are enforced by the gate middleware, not by the handlers;
//! see [`crate::access::policy`].

pub mod access;
pub mod auth;
pub mod billing;
pub mod merchant;
pub mod shopify_auth;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/shopify/install", get(shopify_auth::install))
        .route("/shopify/callback", get(shopify_auth::callback))
        .route("/callback", get(auth::callback))
        .route("/logout", post(auth::logout))
}

/// Create the JSON API router.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/access/check", get(access::check))
        .route("/merchant", get(merchant::show))
        .route("/onboarding/complete", post(merchant::complete_onboarding))
        .route("/billing/subscribe", post(billing::subscribe))
        .route("/billing/status", get(billing::status))
        .route("/billing/manage", get(billing::manage))
}

/// Create the webhook router.
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/shopify", post(webhooks::shopify_webhook))
        .route("/stripe", post(webhooks::stripe_webhook))
}

/// Create the main routes router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/billing/confirm", get(billing::confirm))
        .nest("/auth", auth_routes())
        .nest("/api", api_routes())
        .nest("/webhooks", webhook_routes())
}
