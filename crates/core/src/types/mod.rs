//! Core types for Cartkeeper.
//!
//! This module provides type-safe wrappers for cart domain concepts.

pub mod currency;
pub mod id;
pub mod money;
pub mod owner;
pub mod quantity;
pub mod session_token;
pub mod status;

pub use currency::{CurrencyCode, CurrencyError};
pub use id::*;
pub use money::{Amount, MoneyError, Percent, round_money};
pub use owner::{CallerIdentity, CartOwner};
pub use quantity::{Quantity, QuantityError};
pub use session_token::{SessionToken, SessionTokenError};
pub use status::*;
