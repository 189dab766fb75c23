//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SIGSHIELD_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `SIGSHIELD_BASE_URL` - Public URL of this server
//! - `SIGSHIELD_SESSION_SECRET` - Session signing secret (min 32 chars, high entropy)
//! - `SIGSHIELD_COOKIE_SECRET` - Shop cookie signing key (min 32 chars, high entropy)
//! - `AUTH_URL` - Hosted auth provider base URL (direct channel)
//! - `AUTH_API_KEY` - Hosted auth provider API key
//!
//! ## Shopify (enabled when `SHOPIFY_API_KEY` is set)
//! - `SHOPIFY_API_KEY` - App client ID
//! - `SHOPIFY_API_SECRET` - App client secret (also signs OAuth callbacks and webhooks)
//! - `SHOPIFY_APP_HANDLE` - App handle in the Shopify admin
//! - `SHOPIFY_SCOPES` - Comma-separated scopes (default: `read_orders,read_fulfillments`)
//! - `SHOPIFY_API_VERSION` - API version (default: 2026-01)
//! - `SHOPIFY_PLAN_NAME` - Recurring plan name (default: `SigShield Pro`)
//! - `SHOPIFY_PLAN_PRICE` - Plan price per 30 days (default: 19.00)
//! - `SHOPIFY_PLAN_CURRENCY` - ISO currency code (default: USD)
//! - `SHOPIFY_PLAN_TRIAL_DAYS` - Trial length (default: 0)
//! - `SHOPIFY_BILLING_TEST` - Create test charges (default: false)
//!
//! ## Stripe (enabled when `STRIPE_SECRET_KEY` is set)
//! - `STRIPE_SECRET_KEY` - API secret key
//! - `STRIPE_PRICE_ID` - Recurring price to subscribe merchants to
//! - `STRIPE_WEBHOOK_SECRET` - Webhook endpoint signing secret
//!
//! ## Optional
//! - `SIGSHIELD_HOST` - Bind address (default: 127.0.0.1)
//! - `SIGSHIELD_PORT` - Listen port (default: 3000)
//! - `SIGSHIELD_PROVIDER_TIMEOUT_SECS` - Timeout for provider calls (default: 10)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL, without trailing slash
    pub base_url: String,
    /// Session signing secret
    pub session_secret: SecretString,
    /// Shop cookie signing key
    pub cookie_secret: SecretString,
    /// Upper bound on every call to Shopify, Stripe or the auth provider
    pub provider_timeout: Duration,
    /// Shopify app configuration, if the app-store channel is enabled
    pub shopify: Option<ShopifyConfig>,
    /// Stripe configuration, if direct billing is enabled
    pub stripe: Option<StripeConfig>,
    /// Hosted auth provider for the direct channel
    pub auth: AuthProviderConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Shopify app configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct ShopifyConfig {
    /// App client ID
    pub api_key: String,
    /// App client secret
    pub api_secret: SecretString,
    /// App handle (used in admin billing URLs)
    pub app_handle: String,
    /// OAuth scopes requested at install
    pub scopes: Vec<String>,
    /// Admin API version (e.g., 2026-01)
    pub api_version: String,
    /// Recurring plan offered to app-store merchants
    pub plan: ShopifyPlan,
}

impl std::fmt::Debug for ShopifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyConfig")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("app_handle", &self.app_handle)
            .field("scopes", &self.scopes)
            .field("api_version", &self.api_version)
            .field("plan", &self.plan)
            .finish()
    }
}

/// Recurring Shopify app subscription plan.
#[derive(Debug, Clone)]
pub struct ShopifyPlan {
    /// Plan name shown on the approval page
    pub name: String,
    /// Price per 30-day interval
    pub price: Decimal,
    /// ISO 4217 currency code
    pub currency: String,
    /// Free trial length in days
    pub trial_days: u32,
    /// Whether charges are test charges
    pub test: bool,
}

/// Stripe configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// API secret key
    pub secret_key: SecretString,
    /// Recurring price ID
    pub price_id: String,
    /// Webhook endpoint signing secret
    pub webhook_secret: SecretString,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("price_id", &self.price_id)
            .field("webhook_secret", &"[REDACTED]")
            .finish()
    }
}

/// Hosted auth provider configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct AuthProviderConfig {
    /// Base URL of the auth provider
    pub url: String,
    /// API key sent with every verification call
    pub api_key: SecretString,
}

impl std::fmt::Debug for AuthProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProviderConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("SIGSHIELD_DATABASE_URL")?;
        let host = parse_env("SIGSHIELD_HOST", "127.0.0.1")?;
        let port = parse_env("SIGSHIELD_PORT", "3000")?;
        let base_url = get_required_env("SIGSHIELD_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("SIGSHIELD_BASE_URL".to_string(), e.to_string())
        })?;

        let session_secret = get_validated_secret("SIGSHIELD_SESSION_SECRET")?;
        validate_session_secret(&session_secret, "SIGSHIELD_SESSION_SECRET")?;
        let cookie_secret = get_validated_secret("SIGSHIELD_COOKIE_SECRET")?;
        validate_session_secret(&cookie_secret, "SIGSHIELD_COOKIE_SECRET")?;

        let timeout_secs: u64 = parse_env("SIGSHIELD_PROVIDER_TIMEOUT_SECS", "10")?;

        let shopify = ShopifyConfig::from_env()?;
        let stripe = StripeConfig::from_env()?;
        let auth = AuthProviderConfig {
            url: get_required_env("AUTH_URL")?
                .trim_end_matches('/')
                .to_string(),
            api_key: get_required_secret("AUTH_API_KEY")?,
        };

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            session_secret,
            cookie_secret,
            provider_timeout: Duration::from_secs(timeout_secs),
            shopify,
            stripe,
            auth,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether cookies must carry the `Secure` attribute.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    /// Absolute URL for a path on this server.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl ShopifyConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(api_key) = get_optional_env("SHOPIFY_API_KEY") else {
            return Ok(None);
        };

        let scopes = get_env_or_default("SHOPIFY_SCOPES", "read_orders,read_fulfillments")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let plan = ShopifyPlan {
            name: get_env_or_default("SHOPIFY_PLAN_NAME", "SigShield Pro"),
            price: parse_env("SHOPIFY_PLAN_PRICE", "19.00")?,
            currency: get_env_or_default("SHOPIFY_PLAN_CURRENCY", "USD"),
            trial_days: parse_env("SHOPIFY_PLAN_TRIAL_DAYS", "0")?,
            test: parse_env("SHOPIFY_BILLING_TEST", "false")?,
        };

        Ok(Some(Self {
            api_key,
            api_secret: get_validated_secret("SHOPIFY_API_SECRET")?,
            app_handle: get_required_env("SHOPIFY_APP_HANDLE")?,
            scopes,
            api_version: get_env_or_default("SHOPIFY_API_VERSION", "2026-01"),
            plan,
        }))
    }
}

impl StripeConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(secret_key) = get_optional_env("STRIPE_SECRET_KEY") else {
            return Ok(None);
        };
        validate_secret_strength(&secret_key, "STRIPE_SECRET_KEY")?;

        Ok(Some(Self {
            secret_key: SecretString::from(secret_key),
            price_id: get_required_env("STRIPE_PRICE_ID")?,
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Database URL alone, for tools that only need the database.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if neither `SIGSHIELD_DATABASE_URL`
/// nor `DATABASE_URL` is set.
pub fn database_url_from_env() -> Result<SecretString, ConfigError> {
    get_database_url("SIGSHIELD_DATABASE_URL")
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) with `FromStr`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that a session secret meets minimum length requirements.
fn validate_session_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SESSION_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SESSION_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-cookie-key-goes-here", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength(&"a".repeat(40), "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_session_secret_too_short() {
        let secret = SecretString::from("short");
        assert!(validate_session_secret(&secret, "TEST_SESSION").is_err());
    }

    #[test]
    fn test_shopify_config_debug_redacts_secret() {
        let config = ShopifyConfig {
            api_key: "client_id_value".to_string(),
            api_secret: SecretString::from("super_secret_api_secret"),
            app_handle: "sigshield".to_string(),
            scopes: vec!["read_orders".to_string()],
            api_version: "2026-01".to_string(),
            plan: ShopifyPlan {
                name: "Pro".to_string(),
                price: Decimal::new(1900, 2),
                currency: "USD".to_string(),
                trial_days: 0,
                test: true,
            },
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("client_id_value"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_api_secret"));
    }

    #[test]
    fn test_stripe_config_debug_redacts_secrets() {
        let config = StripeConfig {
            secret_key: SecretString::from("sk_live_abc123"),
            price_id: "price_123".to_string(),
            webhook_secret: SecretString::from("whsec_abc123"),
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("price_123"));
        assert!(!debug_output.contains("sk_live_abc123"));
        assert!(!debug_output.contains("whsec_abc123"));
    }

    #[test]
    fn test_url_for_joins_base() {
        let mut config = crate::testing::test_config();
        config.base_url = "https://app.sigshield.io".to_string();
        assert_eq!(
            config.url_for("/billing/confirm"),
            "https://app.sigshield.io/billing/confirm"
        );
        assert!(config.is_secure());
    }
}
