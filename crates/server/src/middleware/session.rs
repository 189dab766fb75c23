//! Session middleware configuration.
//!
//! Sets up signed, `PostgreSQL`-backed sessions using tower-sessions. The
//! session only carries the Shopify install handshake state; merchant
//! identity never lives here.

use axum::Router;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha512};
use sqlx::PgPool;
use tower_sessions::cookie::{Key, SameSite, time::Duration};
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};
use tower_sessions_sqlx_store::PostgresStore;

use crate::config::{ConfigError, ServerConfig};

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "sigshield_session";

/// Session expiry time in seconds (1 day). Install handshakes take minutes.
const SESSION_EXPIRY_SECONDS: i64 = 24 * 60 * 60;

/// Wrap `router` in a session layer backed by `store`.
///
/// Cookies are signed with a key derived from the session secret.
///
/// # Errors
///
/// Returns `ConfigError` if no signing key can be derived from the secret.
pub fn with_sessions<S>(router: Router, store: S, config: &ServerConfig) -> Result<Router, ConfigError>
where
    S: SessionStore + Clone,
{
    let digest = Sha512::digest(config.session_secret.expose_secret().as_bytes());
    let key = Key::try_from(digest.as_slice()).map_err(|e| {
        ConfigError::InvalidEnvVar("SIGSHIELD_SESSION_SECRET".to_string(), e.to_string())
    })?;

    let layer = SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(Duration::seconds(SESSION_EXPIRY_SECONDS)))
        .with_secure(config.is_secure())
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
        .with_signed(key);

    Ok(router.layer(layer))
}

/// Wrap `router` in sessions stored in `PostgreSQL`.
///
/// The `tower_sessions.session` table must be created via migration.
///
/// # Errors
///
/// Returns `ConfigError` if the session secret is unusable.
pub fn with_postgres_sessions(
    router: Router,
    pool: &PgPool,
    config: &ServerConfig,
) -> Result<Router, ConfigError> {
    with_sessions(router, PostgresStore::new(pool.clone()), config)
}
