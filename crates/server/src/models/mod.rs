//! Domain models for the cart service.
//!
//! These are validated domain objects, separate from the database row types
//! in [`crate::db`].

pub mod audit;
pub mod cart;

pub use audit::{AuditEntry, Caller, ClientMeta, NewAuditEntry};
pub use cart::{Cart, CartHeaderUpdate, LineCount, LineItem, NewCart};
