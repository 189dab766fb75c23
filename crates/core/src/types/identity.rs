//! Identity channels.

use serde::{Deserialize, Serialize};

use super::{BillingProvider, Email, ShopDomain};

/// The channel through which a request identified its merchant.
///
/// Derived per request from session artifacts and never persisted on its
/// own; it is only used to look up a merchant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum IdentityChannel {
    /// Embedded app-store install, identified by a signed shop cookie.
    AppStore {
        /// Shop the install callback bound to the cookie.
        shop_domain: ShopDomain,
    },
    /// Direct signup, identified by a verified auth-provider session.
    Direct {
        /// Email the auth collaborator verified.
        email: Email,
    },
}

impl IdentityChannel {
    /// Billing provider that merchants arriving through this channel use.
    #[must_use]
    pub const fn billing_provider(&self) -> BillingProvider {
        match self {
            Self::AppStore { .. } => BillingProvider::AppStore,
            Self::Direct { .. } => BillingProvider::DirectPay,
        }
    }

    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AppStore { .. } => "app_store",
            Self::Direct { .. } => "direct",
        }
    }
}
