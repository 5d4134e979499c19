//! Core types for Lavka.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod idempotency;
pub mod money;
pub mod status;

pub use email::{Email, EmailError};
pub use id::*;
pub use idempotency::IdempotencyKey;
pub use money::{Currency, Money, MoneyError};
pub use status::*;
