//! Integration tests for SigShield.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p sigshield-integration-tests
//! ```
//!
//! Tests drive the full router (gate, sessions, handlers) in-process against
//! the in-memory stores and stub providers from
//! `sigshield_server::testing`. No database or provider account is needed.
//!
//! # Test Categories
//!
//! - `access_gate` - Tier evaluation over HTTP
//! - `billing` - Subscription reconciliation through the API
//! - `identity` - Install handshake, sign-in, channel precedence and logout
//! - `merchant` - Merchant view and onboarding completion
//! - `webhooks` - Signed provider deliveries

#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use axum::Router;
use axum::body::{Body, Bytes, to_bytes};
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Method, Request, StatusCode, request::Builder};
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tower::ServiceExt;

use sigshield_core::ShopDomain;

pub use sigshield_server::testing::TestApp;

/// Shop used across the scenarios.
#[must_use]
pub fn acme() -> ShopDomain {
    ShopDomain::parse("acme.myshopify.com").unwrap()
}

/// `GET` request builder.
#[must_use]
pub fn get(uri: &str) -> Builder {
    Request::builder().method(Method::GET).uri(uri)
}

/// `POST` request builder.
#[must_use]
pub fn post(uri: &str) -> Builder {
    Request::builder().method(Method::POST).uri(uri)
}

/// Attach a `Cookie` header.
#[must_use]
pub fn with_cookie(builder: Builder, cookie: &str) -> Builder {
    builder.header(COOKIE, cookie)
}

/// Attach a bearer access token.
#[must_use]
pub fn with_bearer(builder: Builder, token: &str) -> Builder {
    builder.header("authorization", format!("Bearer {token}"))
}

/// Collected response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    /// Body parsed as JSON.
    #[must_use]
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    /// `Location` header, if any.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// `name=value` pair of a cookie set by this response.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.set_cookies()
            .into_iter()
            .find(|c| c.starts_with(&format!("{name}=")))
            .map(|c| c.split(';').next().unwrap_or_default().to_string())
    }

    /// Raw `Set-Cookie` values.
    #[must_use]
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(String::from))
            .collect()
    }
}

/// Send a request with an empty body.
pub async fn send(router: &Router, builder: Builder) -> TestResponse {
    send_body(router, builder, Vec::new()).await
}

/// Send a request with `body`.
pub async fn send_body(router: &Router, builder: Builder, body: Vec<u8>) -> TestResponse {
    let response = router
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

fn mac(secret: &SecretString) -> Hmac<Sha256> {
    Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes()).unwrap()
}

/// `X-Shopify-Hmac-Sha256` value for `body`.
#[must_use]
pub fn shopify_webhook_signature(body: &[u8], secret: &SecretString) -> String {
    let mut mac = mac(secret);
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// `Stripe-Signature` value for `body` sent at `timestamp`.
#[must_use]
pub fn stripe_signature(body: &[u8], secret: &SecretString, timestamp: i64) -> String {
    let mut mac = mac(secret);
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
