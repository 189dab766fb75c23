//! Mapping identity channels to merchant tenants.

use std::sync::Arc;

use sigshield_core::IdentityChannel;

use crate::db::{MerchantStore, RepositoryError};
use crate::models::Merchant;

/// Who a request is acting as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// No merchant could be identified.
    Anonymous,
    /// A known merchant, and the channel that identified it.
    Merchant {
        merchant: Merchant,
        channel: IdentityChannel,
    },
}

impl Principal {
    /// The resolved merchant, if any.
    #[must_use]
    pub const fn merchant(&self) -> Option<&Merchant> {
        match self {
            Self::Anonymous => None,
            Self::Merchant { merchant, .. } => Some(merchant),
        }
    }

    /// The identifying channel, if any.
    #[must_use]
    pub const fn channel(&self) -> Option<&IdentityChannel> {
        match self {
            Self::Anonymous => None,
            Self::Merchant { channel, .. } => Some(channel),
        }
    }
}

/// Looks up the merchant row behind an identity channel.
///
/// Resolution never creates merchants; only the install and sign-in
/// callbacks do.
#[derive(Clone)]
pub struct TenantResolver {
    merchants: Arc<dyn MerchantStore>,
}

impl TenantResolver {
    #[must_use]
    pub fn new(merchants: Arc<dyn MerchantStore>) -> Self {
        Self { merchants }
    }

    /// Resolve `channel` to a principal.
    ///
    /// A channel with no merchant row resolves to [`Principal::Anonymous`].
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails. Callers must treat that
    /// as a failure, never as anonymous.
    pub async fn resolve(
        &self,
        channel: Option<IdentityChannel>,
    ) -> Result<Principal, RepositoryError> {
        let Some(channel) = channel else {
            return Ok(Principal::Anonymous);
        };

        let merchant = match &channel {
            IdentityChannel::AppStore { shop_domain } => {
                self.merchants.get_by_shop_domain(shop_domain).await?
            }
            IdentityChannel::Direct { email } => self.merchants.get_by_email(email).await?,
        };

        Ok(merchant.map_or(Principal::Anonymous, |merchant| {
            Principal::Merchant { merchant, channel }
        }))
    }
}
