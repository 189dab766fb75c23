//! Access control: which paths need what, and who gets through.
//!
//! [`policy::AccessPolicy`] assigns every path an access tier;
//! [`gate::AccessGate`] evaluates a tier against the resolved principal.
//! The request middleware lives in `crate::middleware::access`.

pub mod gate;
pub mod policy;

pub use gate::AccessGate;
pub use policy::AccessPolicy;
