//! Signed shop cookie for the app-store channel.
//!
//! The value is `{shop}|{expires_unix}|{hex hmac-sha256}` where the MAC covers
//! `{shop}|{expires_unix}` under the server cookie secret. Only the install
//! callback issues it, after a verified Shopify handshake.

use axum::http::{HeaderMap, header::COOKIE};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tower_sessions::cookie::{Cookie, SameSite, time::Duration};

use sigshield_core::ShopDomain;

type HmacSha256 = Hmac<Sha256>;

/// Cookie name.
pub const SHOP_COOKIE_NAME: &str = "sigshield_shop";

/// Cookie lifetime in seconds (1 hour). Opening the app from the Shopify
/// admin re-issues it.
pub const SHOP_COOKIE_TTL_SECONDS: i64 = 60 * 60;

/// Issues and verifies shop cookies.
#[derive(Clone)]
pub struct ShopCookieSigner {
    key: SecretString,
    secure: bool,
}

impl ShopCookieSigner {
    /// Create a signer. `secure` marks cookies `Secure; SameSite=None` so
    /// they survive inside the Shopify admin iframe.
    #[must_use]
    pub const fn new(key: SecretString, secure: bool) -> Self {
        Self { key, secure }
    }

    fn mac(&self) -> Option<HmacSha256> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes()).ok()
    }

    /// Signed cookie value for `shop`, valid until `now + TTL`.
    #[must_use]
    pub fn sign(&self, shop: &ShopDomain, now: i64) -> String {
        let payload = format!("{shop}|{}", now + SHOP_COOKIE_TTL_SECONDS);
        let signature = self.mac().map_or_else(String::new, |mut mac| {
            mac.update(payload.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        });
        format!("{payload}|{signature}")
    }

    /// Shop named by a cookie value, if the signature holds and it has not
    /// expired. Anything else is treated as no cookie at all.
    #[must_use]
    pub fn verify(&self, value: &str, now: i64) -> Option<ShopDomain> {
        let (payload, signature) = value.rsplit_once('|')?;
        let (shop, expires) = payload.rsplit_once('|')?;

        let signature = hex::decode(signature).ok()?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let expires: i64 = expires.parse().ok()?;
        if now >= expires {
            return None;
        }
        ShopDomain::parse(shop).ok()
    }

    /// First valid shop cookie in the request headers.
    #[must_use]
    pub fn read(&self, headers: &HeaderMap, now: i64) -> Option<ShopDomain> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .filter(|cookie| cookie.name() == SHOP_COOKIE_NAME)
            .find_map(|cookie| self.verify(cookie.value(), now))
    }

    /// `Set-Cookie` binding the browser to `shop`.
    #[must_use]
    pub fn issue(&self, shop: &ShopDomain, now: i64) -> Cookie<'static> {
        self.base(self.sign(shop, now))
            .max_age(Duration::seconds(SHOP_COOKIE_TTL_SECONDS))
            .build()
    }

    /// `Set-Cookie` that expires the shop cookie.
    #[must_use]
    pub fn clear(&self) -> Cookie<'static> {
        self.base(String::new()).max_age(Duration::ZERO).build()
    }

    fn base(&self, value: String) -> tower_sessions::cookie::CookieBuilder<'static> {
        let same_site = if self.secure {
            SameSite::None
        } else {
            SameSite::Lax
        };
        Cookie::build((SHOP_COOKIE_NAME, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(same_site)
    }
}
