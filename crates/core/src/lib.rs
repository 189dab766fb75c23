//! SigShield Core - Shared domain types.
//!
//! This crate provides the types shared by every SigShield component:
//! - `server` - Merchant-facing HTTP backend (identity, access control, billing)
//! - `cli` - Command-line tools for migrations and merchant management
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. Decisions that need I/O live in the server crate.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, validated emails and shop domains, and the
//!   enums describing identity channels, billing providers and access decisions

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
