//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! Responses are JSON: `{"error": "<code>", "message": "..."}`. Gate
//! rejections also carry a `redirect` the client should follow.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::access::policy::{BILLING_PATH, ONBOARDING_PATH};
use crate::billing::BillingError;
use crate::db::RepositoryError;
use crate::identity::AuthError;

/// Application-level error type for the merchant backend.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No merchant could be identified.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The merchant needs an active subscription.
    #[error("Subscription required")]
    SubscriptionRequired,

    /// The merchant has not finished onboarding.
    #[error("Onboarding required")]
    OnboardingRequired,

    /// This server cannot make the requested check.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Billing reconciliation failed.
    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// The auth service could not be reached.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The merchant row disappeared mid-request (e.g. deleted by an operator).
    const fn is_missing_record(&self) -> bool {
        matches!(
            self,
            Self::Database(RepositoryError::NotFound)
                | Self::Billing(BillingError::Repository(RepositoryError::NotFound))
        )
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        if self.is_missing_record() {
            return StatusCode::NOT_FOUND;
        }
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::SubscriptionRequired | Self::OnboardingRequired => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Billing(err) => match err {
                BillingError::SessionMissing | BillingError::ProviderConflict { .. } => {
                    StatusCode::CONFLICT
                }
                BillingError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                BillingError::ProviderRejected(_) => StatusCode::PAYMENT_REQUIRED,
                BillingError::PersistenceFailure { .. }
                | BillingError::NotConfigured(_)
                | BillingError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Config(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        if self.is_missing_record() {
            return "not_found";
        }
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::SubscriptionRequired => "subscription_required",
            Self::OnboardingRequired => "onboarding_required",
            Self::Config(_) => "config_error",
            Self::Billing(err) => match err {
                BillingError::SessionMissing => "billing_session_missing",
                BillingError::ProviderUnavailable(_) => "billing_provider_unavailable",
                BillingError::ProviderRejected(_) => "billing_rejected",
                BillingError::ProviderConflict { .. } => "billing_provider_conflict",
                BillingError::PersistenceFailure { .. }
                | BillingError::NotConfigured(_)
                | BillingError::Repository(_) => "internal_error",
            },
            Self::Auth(_) => "auth_unavailable",
            Self::BadRequest(_) => "bad_request",
            Self::Database(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Where the client should go to resolve the error, if anywhere.
    #[must_use]
    pub const fn redirect(&self) -> Option<&'static str> {
        match self {
            Self::SubscriptionRequired => Some(BILLING_PATH),
            Self::OnboardingRequired => Some(ONBOARDING_PATH),
            _ => None,
        }
    }

    // Don't expose internal error details to clients
    fn public_message(&self) -> String {
        if self.is_missing_record() {
            return "Merchant not found".to_string();
        }
        match self {
            Self::Billing(BillingError::SessionMissing) => {
                "Open the app from your store admin, or sign in again".to_string()
            }
            Self::Billing(BillingError::ProviderUnavailable(_)) => {
                "Billing provider is unavailable, please try again".to_string()
            }
            Self::Billing(BillingError::ProviderRejected(msg)) => msg.clone(),
            Self::Billing(BillingError::ProviderConflict { current }) => {
                format!("Your subscription is managed through {current}")
            }
            Self::Auth(_) => "Sign-in service is unavailable, please try again".to_string(),
            Self::NotFound(_) | Self::Unauthorized(_) | Self::BadRequest(_) => self.to_string(),
            Self::SubscriptionRequired => "An active subscription is required".to_string(),
            Self::OnboardingRequired => "Finish onboarding to continue".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let mut body = json!({
            "error": self.code(),
            "message": self.public_message(),
        });
        if let Some(redirect) = self.redirect() {
            body["redirect"] = json!(redirect);
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a merchant ID.
///
/// Call this after resolution to associate errors with merchants.
pub fn set_sentry_user(merchant_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(merchant_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the merchant.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for merchant actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("billing", "Subscription created", Some(&[("provider", "app_store")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use axum::body::to_bytes;
    use sigshield_core::BillingProvider;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("merchant 7".to_string());
        assert_eq!(err.to_string(), "Not found: merchant 7");

        let err = AppError::BadRequest("invalid shop".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid shop");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            AppError::Unauthorized("x".to_string()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::SubscriptionRequired.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::OnboardingRequired.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::Config("x".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Auth(AuthError::Unavailable("down".to_string())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_billing_error_status_codes() {
        let status = |err: BillingError| AppError::from(err).status();
        assert_eq!(status(BillingError::SessionMissing), StatusCode::CONFLICT);
        assert_eq!(
            status(BillingError::ProviderUnavailable("timeout".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(BillingError::ProviderRejected("declined".to_string())),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status(BillingError::PersistenceFailure {
                provider: BillingProvider::DirectPay,
                reference: "sub_1".to_string(),
                source: RepositoryError::NotFound,
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_missing_merchant_is_not_found() {
        for err in [
            AppError::Database(RepositoryError::NotFound),
            AppError::Billing(BillingError::Repository(RepositoryError::NotFound)),
        ] {
            let (status, body) = body_json(err).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"], "not_found");
            assert_eq!(body["message"], "Merchant not found");
        }

        let outage = AppError::Database(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(outage.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_subscription_required_body() {
        let (status, body) = body_json(AppError::SubscriptionRequired).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "subscription_required");
        assert_eq!(body["redirect"], "/billing");
    }

    #[tokio::test]
    async fn test_onboarding_required_body() {
        let (_, body) = body_json(AppError::OnboardingRequired).await;
        assert_eq!(body["error"], "onboarding_required");
        assert_eq!(body["redirect"], "/onboarding");
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let (status, body) = body_json(AppError::Internal("pool exhausted".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("redirect").is_none());
    }

    #[tokio::test]
    async fn test_provider_rejection_is_shown() {
        let err = AppError::from(BillingError::ProviderRejected(
            "Your card was declined.".to_string(),
        ));
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["message"], "Your card was declined.");
    }
}
