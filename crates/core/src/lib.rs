//! Cartkeeper Core - cart domain types and algorithms.
//!
//! This crate is shared by the other Cartkeeper crates:
//! - `server` - HTTP binary that persists carts in `PostgreSQL`
//! - `cli` - Command-line tools for migrations and maintenance
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no database
//! access, no HTTP. Everything that decides a number (totals, tax shares) or
//! a merge outcome lives here so it can be tested without a database.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, money, quantities, identities and statuses
//! - [`pricing`] - Cart total computation for `simple` and `multi` tax modes
//! - [`merge`] - Line disposition and statistics for anonymous-to-user cart merges

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod merge;
pub mod pricing;
pub mod types;

pub use types::*;
