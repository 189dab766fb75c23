//! Verification of direct-signup sessions against the hosted auth service.
//!
//! The auth service owns passwords, magic links and email confirmation. We
//! only forward the caller's access token and read back who it belongs to.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION, header::COOKIE};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tower_sessions::cookie::Cookie;

use sigshield_core::Email;

use crate::config::AuthProviderConfig;

/// Cookie the frontend stores the auth-service access token in, for
/// requests that cannot set an `Authorization` header.
pub const AUTH_COOKIE_NAME: &str = "sigshield_auth";

/// Errors talking to the auth service.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Network failure, timeout or auth-service 5xx.
    #[error("auth service unavailable: {0}")]
    Unavailable(String),

    /// The auth service answered with something we could not interpret.
    #[error("invalid auth service response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// Identity the auth service vouched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub email: Email,
    pub has_password: bool,
    pub email_login: Option<String>,
}

/// Turns request credentials into a verified identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Identity behind the request's access token.
    ///
    /// `Ok(None)` means there is no token, or the auth service rejected it.
    async fn verify(&self, headers: &HeaderMap) -> Result<Option<VerifiedIdentity>, AuthError>;

    /// Invalidate the request's access token at the auth service.
    async fn revoke(&self, headers: &HeaderMap) -> Result<(), AuthError>;
}

/// Access token from `Authorization: Bearer` or the auth cookie.
#[must_use]
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == AUTH_COOKIE_NAME && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    email: Option<String>,
    email_confirmed_at: Option<String>,
    #[serde(default)]
    app_metadata: AppMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct AppMetadata {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    providers: Vec<String>,
}

impl AuthUser {
    /// Identity for a confirmed user. Unconfirmed emails are not trusted.
    fn into_identity(self) -> Option<VerifiedIdentity> {
        self.email_confirmed_at.as_ref()?;
        let email = Email::parse(self.email.as_deref()?).ok()?;
        let has_password = self.app_metadata.providers.iter().any(|p| p == "email")
            || self.app_metadata.provider.as_deref() == Some("email");
        Some(VerifiedIdentity {
            email_login: Some(email.as_str().to_string()),
            email,
            has_password,
        })
    }
}

/// [`IdentityVerifier`] backed by the hosted auth service's REST API.
#[derive(Clone)]
pub struct HostedAuthVerifier {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl HostedAuthVerifier {
    /// Create a verifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AuthProviderConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HostedAuthVerifier {
    async fn verify(&self, headers: &HeaderMap) -> Result<Option<VerifiedIdentity>, AuthError> {
        let Some(token) = access_token(headers) else {
            return Ok(None);
        };

        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", self.api_key.expose_secret())
            .bearer_auth(&token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::debug!("Auth service rejected access token");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AuthError::Unavailable(format!(
                "auth service returned {status}"
            )));
        }

        let user: AuthUser = response.json().await?;
        let identity = user.into_identity();
        if identity.is_none() {
            tracing::debug!("Auth user has no confirmed email");
        }
        Ok(identity)
    }

    async fn revoke(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let Some(token) = access_token(headers) else {
            return Ok(());
        };

        let response = self
            .client
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", self.api_key.expose_secret())
            .bearer_auth(&token)
            .send()
            .await?;

        // An already-invalid token is as logged out as it gets
        let status = response.status();
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(AuthError::Unavailable(format!(
                "auth service returned {status}"
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use axum::{Json, Router, extract::State, routing::get, routing::post};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_access_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        headers.insert(COOKIE, format!("{AUTH_COOKIE_NAME}=xyz").parse().unwrap());
        assert_eq!(access_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn test_access_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            format!("a=1; {AUTH_COOKIE_NAME}=xyz").parse().unwrap(),
        );
        assert_eq!(access_token(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_access_token_absent() {
        let mut headers = HeaderMap::new();
        assert_eq!(access_token(&headers), None);
        headers.insert(AUTHORIZATION, "Basic Zm9v".parse().unwrap());
        assert_eq!(access_token(&headers), None);
    }

    #[test]
    fn test_unconfirmed_email_is_not_trusted() {
        let user: AuthUser = serde_json::from_str(
            r#"{"email":"ops@acme.example","email_confirmed_at":null,"app_metadata":{}}"#,
        )
        .unwrap();
        assert!(user.into_identity().is_none());
    }

    #[test]
    fn test_confirmed_user_identity() {
        let user: AuthUser = serde_json::from_str(
            r#"{
                "email": "Ops@Acme.Example",
                "email_confirmed_at": "2024-01-01T00:00:00Z",
                "app_metadata": {"provider": "email", "providers": ["email", "google"]}
            }"#,
        )
        .unwrap();
        let identity = user.into_identity().unwrap();
        assert_eq!(identity.email.as_str(), "ops@acme.example");
        assert!(identity.has_password);
    }

    #[test]
    fn test_oauth_only_user_has_no_password() {
        let user: AuthUser = serde_json::from_str(
            r#"{
                "email": "ops@acme.example",
                "email_confirmed_at": "2024-01-01T00:00:00Z",
                "app_metadata": {"provider": "google", "providers": ["google"]}
            }"#,
        )
        .unwrap();
        assert!(!user.into_identity().unwrap().has_password);
    }

    #[derive(Clone, Default)]
    struct AuthServer {
        logouts: Arc<Mutex<Vec<String>>>,
    }

    fn bearer(headers: &HeaderMap) -> String {
        access_token(headers).unwrap_or_default()
    }

    async fn user(headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
        match bearer(&headers).as_str() {
            "good" => Ok(Json(serde_json::json!({
                "email": "ops@acme.example",
                "email_confirmed_at": "2024-01-01T00:00:00Z",
                "app_metadata": {"providers": ["email"]}
            }))),
            "broken" => Err(StatusCode::BAD_GATEWAY),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }

    async fn logout(State(server): State<AuthServer>, headers: HeaderMap) -> StatusCode {
        server.logouts.lock().unwrap().push(bearer(&headers));
        StatusCode::NO_CONTENT
    }

    async fn verifier() -> (HostedAuthVerifier, AuthServer) {
        let server = AuthServer::default();
        let app = Router::new()
            .route("/auth/v1/user", get(user))
            .route("/auth/v1/logout", post(logout))
            .with_state(server.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = AuthProviderConfig {
            url: format!("http://{addr}/"),
            api_key: SecretString::from("anon-key"),
        };
        let verifier = HostedAuthVerifier::new(&config, Duration::from_secs(5)).unwrap();
        (verifier, server)
    }

    fn with_token(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_verify_against_auth_service() {
        let (verifier, _) = verifier().await;

        let identity = verifier.verify(&with_token("good")).await.unwrap().unwrap();
        assert_eq!(identity.email.as_str(), "ops@acme.example");

        assert!(verifier.verify(&with_token("expired")).await.unwrap().is_none());
        assert!(verifier.verify(&HeaderMap::new()).await.unwrap().is_none());
        assert!(matches!(
            verifier.verify(&with_token("broken")).await,
            Err(AuthError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_calls_logout() {
        let (verifier, server) = verifier().await;
        verifier.revoke(&with_token("good")).await.unwrap();
        verifier.revoke(&HeaderMap::new()).await.unwrap();
        assert_eq!(*server.logouts.lock().unwrap(), vec!["good".to_string()]);
    }
}
