//! Request identity: which merchant, if any, a request belongs to.
//!
//! Two channels can identify a merchant:
//!
//! - **App store**: a signed shop cookie issued by the Shopify install
//!   callback ([`cookie`])
//! - **Direct**: an access token verified by the hosted auth service
//!   ([`verifier`])
//!
//! The [`SessionBridge`] picks the channel for a request, and the
//! [`TenantResolver`] maps it to a merchant row.

pub mod cookie;
pub mod resolver;
pub mod verifier;

use std::sync::Arc;

use axum::http::HeaderMap;

use sigshield_core::IdentityChannel;

pub use cookie::{SHOP_COOKIE_NAME, ShopCookieSigner};
pub use resolver::{Principal, TenantResolver};
pub use verifier::{AuthError, HostedAuthVerifier, IdentityVerifier, VerifiedIdentity};

/// Reads identity artifacts off a request.
#[derive(Clone)]
pub struct SessionBridge {
    cookies: ShopCookieSigner,
    verifier: Arc<dyn IdentityVerifier>,
}

impl SessionBridge {
    #[must_use]
    pub fn new(cookies: ShopCookieSigner, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { cookies, verifier }
    }

    /// Identity channel of a request.
    ///
    /// A valid shop cookie wins; the auth service is only asked when there
    /// is none. Invalid, expired or forged cookies count as absent.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the auth service cannot be reached.
    pub async fn extract_principal(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<IdentityChannel>, AuthError> {
        let now = chrono::Utc::now().timestamp();
        if let Some(shop_domain) = self.cookies.read(headers, now) {
            return Ok(Some(IdentityChannel::AppStore { shop_domain }));
        }

        Ok(self
            .verifier
            .verify(headers)
            .await?
            .map(|identity| IdentityChannel::Direct {
                email: identity.email,
            }))
    }

    /// Signer for the shop cookie.
    #[must_use]
    pub const fn cookies(&self) -> &ShopCookieSigner {
        &self.cookies
    }

    /// Direct-channel verifier.
    #[must_use]
    pub fn verifier(&self) -> &dyn IdentityVerifier {
        self.verifier.as_ref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use axum::http::header::{AUTHORIZATION, COOKIE};
    use secrecy::SecretString;
    use sigshield_core::{Email, ShopDomain};

    use crate::testing::StaticVerifier;

    fn bridge(verifier: Arc<StaticVerifier>) -> SessionBridge {
        SessionBridge::new(
            ShopCookieSigner::new(SecretString::from("cookie-key"), false),
            verifier,
        )
    }

    fn acme() -> ShopDomain {
        ShopDomain::parse("acme.myshopify.com").unwrap()
    }

    #[tokio::test]
    async fn test_shop_cookie_wins_without_calling_verifier() {
        let verifier = Arc::new(StaticVerifier::new());
        verifier.allow("tok", "ops@acme.example");
        verifier.set_unavailable(true);
        let bridge = bridge(verifier.clone());

        let now = chrono::Utc::now().timestamp();
        let value = bridge.cookies().sign(&acme(), now);
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, format!("{SHOP_COOKIE_NAME}={value}").parse().unwrap());
        headers.insert(AUTHORIZATION, "Bearer tok".parse().unwrap());

        let channel = bridge.extract_principal(&headers).await.unwrap();
        assert_eq!(channel, Some(IdentityChannel::AppStore { shop_domain: acme() }));
        assert_eq!(verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_forged_cookie_falls_back_to_direct() {
        let verifier = Arc::new(StaticVerifier::new());
        verifier.allow("tok", "ops@acme.example");
        let bridge = bridge(verifier);

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            format!("{SHOP_COOKIE_NAME}=acme.myshopify.com|9999999999|00")
                .parse()
                .unwrap(),
        );
        headers.insert(AUTHORIZATION, "Bearer tok".parse().unwrap());

        let channel = bridge.extract_principal(&headers).await.unwrap();
        assert_eq!(
            channel,
            Some(IdentityChannel::Direct {
                email: Email::parse("ops@acme.example").unwrap()
            })
        );
    }

    #[tokio::test]
    async fn test_nothing_presented() {
        let bridge = bridge(Arc::new(StaticVerifier::new()));
        assert_eq!(bridge.extract_principal(&HeaderMap::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_auth_outage_is_an_error() {
        let verifier = Arc::new(StaticVerifier::new());
        verifier.set_unavailable(true);
        let bridge = bridge(verifier);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer tok".parse().unwrap());
        assert!(bridge.extract_principal(&headers).await.is_err());
    }
}
