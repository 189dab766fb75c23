//! Shopify offline session captured by the install callback.

use secrecy::SecretString;

use sigshield_core::ShopDomain;

/// A Shopify offline access token for one shop.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct ShopSession {
    /// Session id (`offline_{shop}`).
    pub id: String,
    /// Shop the token was issued for.
    pub shop: ShopDomain,
    /// Admin API access token (redacted in debug output).
    pub access_token: SecretString,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Unix timestamp when the token was obtained.
    pub obtained_at: i64,
}

impl ShopSession {
    /// Build the offline session for `shop`.
    #[must_use]
    pub fn offline(shop: ShopDomain, access_token: SecretString, scopes: Vec<String>) -> Self {
        Self {
            id: shop.offline_session_id(),
            shop,
            access_token,
            scopes,
            obtained_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl std::fmt::Debug for ShopSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopSession")
            .field("id", &self.id)
            .field("shop", &self.shop)
            .field("access_token", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let session = ShopSession::offline(
            ShopDomain::parse("acme.myshopify.com").unwrap(),
            SecretString::from("shpat_very_secret"),
            vec!["read_orders".to_string()],
        );
        let debug_output = format!("{session:?}");
        assert!(debug_output.contains("offline_acme.myshopify.com"));
        assert!(!debug_output.contains("shpat_very_secret"));
    }
}
