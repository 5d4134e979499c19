//! Session-related types.
//!
//! Types stored in the session by the login flow and by checkout.

use serde::{Deserialize, Serialize};

use lavka_core::{Email, UserId};

/// Session-stored user identity.
///
/// Written by the account login flow; checkout only reads it to decide
/// between the authenticated and guest persistence rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User's database ID.
    pub id: UserId,
    /// User's email address.
    pub email: Email,
}

/// Session keys.
pub mod keys {
    /// Key for storing the current logged-in user.
    pub const CURRENT_USER: &str = "current_user";

    /// Key for the session cart. Cleared by the payment success page.
    pub const CART: &str = "session_key";

    /// Key for the idempotency key minted by the checkout page.
    pub const CHECKOUT_IDEMPOTENCY_KEY: &str = "checkout_idempotency_key";
}
