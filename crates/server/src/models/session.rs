//! Keys for values held in the server-side session.
//!
//! The session only carries handshake state. Merchant identity comes from
//! the signed shop cookie or the auth provider, never from the session.

/// Session keys.
pub mod keys {
    /// Nonce sent as `state` in the Shopify install redirect.
    pub const OAUTH_STATE: &str = "shopify_oauth_state";

    /// Shop the pending install handshake was started for.
    pub const OAUTH_SHOP: &str = "shopify_oauth_shop";
}
