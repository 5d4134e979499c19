//! Lavka Core - Shared domain types.
//!
//! This crate provides the types shared by every Lavka component:
//! - `storefront` - Public shop, cart and checkout
//! - `cli` - Migrations and demo data seeding
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. Database encoding is available behind the `postgres`
//! feature so the storefront can bind these types directly in queries.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, email addresses, money, order and payment statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
