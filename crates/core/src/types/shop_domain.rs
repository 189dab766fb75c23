//! Shopify shop domain type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`ShopDomain`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShopDomainError {
    /// The input string is empty.
    #[error("shop domain cannot be empty")]
    Empty,
    /// The input is not a `*.myshopify.com` host.
    #[error("shop domain must end with {suffix}")]
    WrongSuffix {
        /// Required suffix.
        suffix: &'static str,
    },
    /// The shop handle contains characters Shopify never issues.
    #[error("invalid shop handle: {0}")]
    InvalidHandle(String),
}

/// A validated `{handle}.myshopify.com` domain.
///
/// This is the identity of a merchant on the app-store channel. Only values
/// that pass validation are ever looked up or written, so a query-string
/// `shop` parameter like `evil.com/.myshopify.com` never reaches the store.
///
/// Parsing accepts an optional `https://` prefix and trailing slash, and
/// lowercases the result.
///
/// ```
/// use sigshield_core::ShopDomain;
///
/// let shop = ShopDomain::parse("https://Acme.myshopify.com/").unwrap();
/// assert_eq!(shop.as_str(), "acme.myshopify.com");
/// assert_eq!(shop.handle(), "acme");
///
/// assert!(ShopDomain::parse("acme.example.com").is_err());
/// assert!(ShopDomain::parse("-acme.myshopify.com").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ShopDomain(String);

impl ShopDomain {
    /// Domain suffix of every Shopify shop.
    pub const SUFFIX: &'static str = ".myshopify.com";

    /// Maximum length of a shop handle.
    const MAX_HANDLE_LENGTH: usize = 60;

    /// Parse and normalize a `ShopDomain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, is not a `myshopify.com`
    /// subdomain, or the handle is not `[a-z0-9][a-z0-9-]*`.
    pub fn parse(s: &str) -> Result<Self, ShopDomainError> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("https://").unwrap_or(trimmed);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(ShopDomainError::Empty);
        }

        let lower = trimmed.to_lowercase();
        let Some(handle) = lower.strip_suffix(Self::SUFFIX) else {
            return Err(ShopDomainError::WrongSuffix {
                suffix: Self::SUFFIX,
            });
        };

        let valid_chars = handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        let starts_alnum = handle
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        if !valid_chars || !starts_alnum || handle.len() > Self::MAX_HANDLE_LENGTH {
            return Err(ShopDomainError::InvalidHandle(handle.to_owned()));
        }

        Ok(Self(lower))
    }

    /// Returns the domain as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the shop handle (the part before `.myshopify.com`).
    #[must_use]
    pub fn handle(&self) -> &str {
        self.0.strip_suffix(Self::SUFFIX).unwrap_or(&self.0)
    }

    /// Identifier of the offline Shopify session for this shop.
    #[must_use]
    pub fn offline_session_id(&self) -> String {
        format!("offline_{}", self.0)
    }
}

impl fmt::Display for ShopDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ShopDomain {
    type Err = ShopDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ShopDomain {
    type Error = ShopDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShopDomain> for String {
    fn from(shop: ShopDomain) -> Self {
        shop.0
    }
}

impl AsRef<str> for ShopDomain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for ShopDomain {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ShopDomain {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for ShopDomain {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
