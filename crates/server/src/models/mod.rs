//! Domain models for the merchant backend.

pub mod merchant;
pub mod session;
pub mod shop_session;

pub use merchant::{Merchant, MerchantView, NewMerchant};
pub use session::keys as session_keys;
pub use shop_session::ShopSession;
