//! Merchant profile and onboarding endpoints.

use axum::http::StatusCode;

use sigshield_integration_tests::{TestApp, acme, get, post, send, with_bearer, with_cookie};
use sigshield_server::db::MerchantStore;

#[tokio::test]
async fn test_onboarding_completion_is_idempotent() {
    let app = TestApp::new();
    let merchant = app.app_store_merchant("acme.myshopify.com", false).await;
    let cookie = app.shop_cookie(&acme());
    let router = app.router();

    let first = send(&router, with_cookie(post("/api/onboarding/complete"), &cookie)).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.json()["changed"], true);
    let after_first = app.merchants.get_by_id(merchant.id).await.unwrap().unwrap();

    let second = send(&router, with_cookie(post("/api/onboarding/complete"), &cookie)).await;
    assert_eq!(second.status, StatusCode::OK);
    let body = second.json();
    assert_eq!(body["onboarding_completed"], true);
    assert_eq!(body["changed"], false);

    let after_second = app.merchants.get_by_id(merchant.id).await.unwrap().unwrap();
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn test_merchant_view_for_direct_signup() {
    let app = TestApp::new();
    app.direct_merchant("tok", "ops@acme.example", true).await;

    let response = send(&app.router(), with_bearer(get("/api/merchant"), "tok")).await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["contact_email"], "ops@acme.example");
    assert_eq!(body["shop_domain"], serde_json::Value::Null);
    assert_eq!(body["billing_provider"], "none");
    assert_eq!(body["subscription_active"], false);
}
