//! Core types for SigShield.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod access;
pub mod billing;
pub mod email;
pub mod id;
pub mod identity;
pub mod shop_domain;

pub use access::{AccessDecision, AccessTier};
pub use billing::{BillingProvider, RemoteSubscriptionStatus};
pub use email::{Email, EmailError};
pub use id::*;
pub use identity::IdentityChannel;
pub use shop_domain::{ShopDomain, ShopDomainError};
