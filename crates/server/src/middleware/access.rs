//! Access-gate middleware and the current-merchant extractor.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{StatusCode, header::LOCATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use sigshield_core::{AccessDecision, AccessTier, IdentityChannel};

use crate::access::policy::{BILLING_PATH, LOGIN_PATH, ONBOARDING_PATH};
use crate::error::AppError;
use crate::identity::Principal;
use crate::models::Merchant;
use crate::state::AppState;

/// Gate every request by the tier of its path.
///
/// Public paths pass untouched. Everything else is resolved to a
/// [`Principal`], evaluated, and either rejected or passed on with the
/// principal in the request extensions. Resolution failures reject.
pub async fn access_gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let tier = state.policy().tier_for(&path);
    if tier == AccessTier::Public {
        return next.run(request).await;
    }

    let principal = match state.resolve_principal(request.headers()).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let decision = state.gate().evaluate(tier, &principal);
    if decision.is_allowed() {
        request.extensions_mut().insert(principal);
        return next.run(request).await;
    }

    tracing::debug!(path = %path, ?tier, ?decision, "Access denied");
    rejection(&path, decision)
}

/// Response for a denied request.
///
/// Browsers are redirected; API callers get a status with a JSON body.
fn rejection(path: &str, decision: AccessDecision) -> Response {
    let is_api = path.starts_with("/api/");

    let (target, error) = match decision {
        AccessDecision::RejectUnauthenticated => (
            LOGIN_PATH,
            AppError::Unauthorized("No merchant session".to_string()),
        ),
        AccessDecision::RedirectOnboarding => (ONBOARDING_PATH, AppError::OnboardingRequired),
        AccessDecision::RedirectBilling => (BILLING_PATH, AppError::SubscriptionRequired),
        AccessDecision::RejectConfigError => {
            return AppError::Config("billing provider is not configured".to_string())
                .into_response();
        }
        AccessDecision::Allow => {
            return AppError::Internal("allowed request reached rejection".to_string())
                .into_response();
        }
    };

    if is_api {
        error.into_response()
    } else {
        (StatusCode::FOUND, [(LOCATION, target)]).into_response()
    }
}

/// Merchant resolved by [`access_gate`].
///
/// Only available on non-public paths.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(CurrentMerchant { merchant, .. }: CurrentMerchant) -> String {
///     merchant.id.to_string()
/// }
/// ```
pub struct CurrentMerchant {
    pub merchant: Merchant,
    pub channel: IdentityChannel,
}

impl<S> FromRequestParts<S> for CurrentMerchant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Principal>() {
            Some(Principal::Merchant { merchant, channel }) => Ok(Self {
                merchant: merchant.clone(),
                channel: channel.clone(),
            }),
            _ => Err(AppError::Unauthorized("No merchant session".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_rejections_redirect() {
        let response = rejection("/app", AccessDecision::RedirectBilling);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "/billing");

        let response = rejection("/billing", AccessDecision::RedirectOnboarding);
        assert_eq!(response.headers()[LOCATION], "/onboarding");

        let response = rejection("/app", AccessDecision::RejectUnauthenticated);
        assert_eq!(response.headers()[LOCATION], "/auth/login");
    }

    #[test]
    fn test_api_rejections_use_status() {
        assert_eq!(
            rejection("/api/shipments", AccessDecision::RejectUnauthenticated).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            rejection("/api/shipments", AccessDecision::RedirectBilling).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            rejection("/api/billing/subscribe", AccessDecision::RedirectOnboarding).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_config_error_is_server_error() {
        assert_eq!(
            rejection("/app", AccessDecision::RejectConfigError).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
