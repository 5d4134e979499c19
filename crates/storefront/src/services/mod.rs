//! Business logic services for storefront.
//!
//! # Services
//!
//! - `checkout` - Cart to order conversion and payment provider redirects
//! - `settlement` - Provider webhooks moving orders to paid or cancelled

pub mod checkout;
pub mod settlement;

pub use checkout::{
    CheckoutError, CheckoutOutcome, CheckoutRequest, CheckoutService, CheckoutSettings, OrderStore,
};
pub use settlement::{Settlement, SettlementError, SettlementService};
