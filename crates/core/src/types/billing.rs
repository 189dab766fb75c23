//! Billing provider types.

use serde::{Deserialize, Serialize};

/// Which external system bills a merchant.
///
/// A merchant has at most one provider at a time. `None` means no provider
/// has been selected yet (no reconciliation has ever succeeded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "billing_provider", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum BillingProvider {
    /// Shopify app subscription billing (embedded app-store channel).
    AppStore,
    /// Stripe subscription billing (direct signup channel).
    DirectPay,
    /// No provider selected.
    #[default]
    None,
}

impl std::fmt::Display for BillingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AppStore => write!(f, "app_store"),
            Self::DirectPay => write!(f, "direct_pay"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for BillingProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app_store" => Ok(Self::AppStore),
            "direct_pay" => Ok(Self::DirectPay),
            "none" => Ok(Self::None),
            _ => Err(format!("invalid billing provider: {s}")),
        }
    }
}

/// Status of a subscription object as reported by its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSubscriptionStatus {
    /// Paid up (or trialing); grants access.
    Active,
    /// Created but awaiting merchant approval or first payment.
    Pending,
    /// Cancelled, declined, expired, frozen, or unknown to the provider.
    Inactive,
}

impl RemoteSubscriptionStatus {
    /// Whether this status grants access to subscription-required paths.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}
