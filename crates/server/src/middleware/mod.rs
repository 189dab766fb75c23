//! HTTP middleware stack for the merchant backend.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. Session layer (tower-sessions, install handshake state)
//! 3. `TraceLayer` (request tracing)
//! 4. Access gate (resolve principal, enforce path tier)

pub mod access;
pub mod session;

pub use access::{CurrentMerchant, access_gate};
pub use session::{with_postgres_sessions, with_sessions};
