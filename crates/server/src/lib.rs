//! SigShield merchant backend library.
//!
//! Resolves each request to a merchant tenant, gates it on onboarding and
//! subscription state, and keeps billing linkage in step with Shopify and
//! Stripe. The binary in `main.rs` wires this library to Postgres and the
//! real providers; tests wire it to the in-memory doubles in [`testing`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod access;
pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use axum::{Router, extract::State, http::StatusCode, routing::get};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
///
/// Every route, including unknown paths, passes through the access gate.
/// Callers add the session and Sentry layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes::routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::access_gate,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies database connectivity before returning OK.
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.merchants().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
