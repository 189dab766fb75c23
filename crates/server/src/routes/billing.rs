//! Billing route handlers.
//!
//! All provider work goes through the [`BillingReconciler`]; these handlers
//! only pick the provider and shape responses.
//!
//! [`BillingReconciler`]: crate::billing::BillingReconciler

use axum::{
    Extension, Json,
    extract::State,
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::access::policy::{APP_PATH, BILLING_PATH};
use crate::billing::EnsureOutcome;
use crate::billing::reconciler::BillingStatus;
use crate::error::{Result, add_breadcrumb};
use crate::identity::Principal;
use crate::middleware::CurrentMerchant;
use crate::state::AppState;

/// Start or resume a subscription with the merchant's provider.
///
/// Returns a `confirmation_url` when the merchant must approve the charge.
///
/// # Route
///
/// `POST /api/billing/subscribe`
///
/// # Errors
///
/// Returns `AppError::Billing` if reconciliation fails.
#[tracing::instrument(skip_all, fields(merchant_id = %current.merchant.id))]
pub async fn subscribe(
    State(state): State<AppState>,
    current: CurrentMerchant,
) -> Result<Json<EnsureOutcome>> {
    let CurrentMerchant { merchant, channel } = current;
    let provider = merchant.effective_provider();
    let outcome = state
        .reconciler()
        .ensure_subscription(&merchant, provider, &channel)
        .await?;

    if outcome.created {
        let provider = provider.to_string();
        add_breadcrumb(
            "billing",
            "Subscription created",
            Some(&[("provider", provider.as_str())]),
        );
    }
    Ok(Json(outcome))
}

/// Return URL after the merchant approves (or declines) a Shopify charge.
///
/// Refreshes the linkage from the provider, then sends the merchant to the
/// app if the subscription is live, or back to billing if it is not.
///
/// # Route
///
/// `GET /billing/confirm`
///
/// # Errors
///
/// Returns `AppError::Billing` if the refresh fails.
#[tracing::instrument(skip_all, fields(merchant_id = %current.merchant.id))]
pub async fn confirm(State(state): State<AppState>, current: CurrentMerchant) -> Result<Response> {
    let status = state.reconciler().refresh_status(&current.merchant).await?;
    let target = if status.active { APP_PATH } else { BILLING_PATH };
    tracing::info!(active = status.active, "Billing confirmation returned");
    Ok((StatusCode::FOUND, [(LOCATION, target)]).into_response())
}

/// Current billing state, refreshed from the provider.
///
/// # Route
///
/// `GET /api/billing/status`
///
/// # Errors
///
/// Returns `AppError::Billing` if the refresh fails.
pub async fn status(
    State(state): State<AppState>,
    CurrentMerchant { merchant, .. }: CurrentMerchant,
) -> Result<Json<BillingStatus>> {
    Ok(Json(state.reconciler().refresh_status(&merchant).await?))
}

#[derive(Debug, Serialize)]
pub struct ManageResponse {
    pub url: String,
}

/// Provider page where the merchant manages their plan.
///
/// # Route
///
/// `GET /api/billing/manage`
///
/// # Errors
///
/// Returns `AppError::SubscriptionRequired` without an active subscription,
/// or `AppError::Billing` if the provider fails.
pub async fn manage(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ManageResponse>> {
    let merchant = state.gate().require_subscription(&principal)?;
    let url = state.reconciler().manage_url(merchant).await?;
    Ok(Json(ManageResponse { url }))
}
