//! Merchant profile and onboarding handlers.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::error::{Result, add_breadcrumb};
use crate::middleware::CurrentMerchant;
use crate::models::MerchantView;
use crate::state::AppState;

/// Current merchant's non-sensitive fields.
///
/// # Route
///
/// `GET /api/merchant`
pub async fn show(CurrentMerchant { merchant, .. }: CurrentMerchant) -> Json<MerchantView> {
    Json(MerchantView::from(&merchant))
}

#[derive(Debug, Serialize)]
pub struct OnboardingResponse {
    pub onboarding_completed: bool,
    /// `false` when onboarding was already complete.
    pub changed: bool,
}

/// Mark onboarding complete. Repeating it is a no-op.
///
/// # Route
///
/// `POST /api/onboarding/complete`
///
/// # Errors
///
/// Returns `AppError::Database` if the store fails.
#[tracing::instrument(skip_all, fields(merchant_id = %current.merchant.id))]
pub async fn complete_onboarding(
    State(state): State<AppState>,
    current: CurrentMerchant,
) -> Result<Json<OnboardingResponse>> {
    let changed = state
        .merchants()
        .set_onboarding_completed(current.merchant.id)
        .await?;
    if changed {
        tracing::info!("Onboarding completed");
        add_breadcrumb("onboarding", "Onboarding completed", None);
    }

    Ok(Json(OnboardingResponse {
        onboarding_completed: true,
        changed,
    }))
}
