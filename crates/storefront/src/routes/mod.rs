//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! # Cart (HTMX fragments)
//! GET  /cart                        - Cart page
//! POST /cart/add                    - Add to cart (returns count badge, triggers cart-updated)
//! POST /cart/update                 - Update quantity (returns cart_items fragment)
//! POST /cart/remove                 - Remove item (returns cart_items fragment)
//! GET  /cart/count                  - Cart count badge (fragment)
//!
//! # Payment
//! GET  /payment/shipping            - Shipping form (requires auth)
//! POST /payment/shipping            - Save shipping address (requires auth)
//! GET  /payment/checkout            - Checkout page, mints the idempotency key
//! POST /payment/complete-order      - Create order, redirect to provider (rate limited)
//! GET  /payment/payment-success     - Success page, clears the cart
//! GET  /payment/payment-failed      - Failure page
//!
//! # Webhooks
//! POST /payment/webhook/stripe      - Signed Stripe events
//! POST /payment/webhook/yookassa    - YooKassa notifications
//! ```
//!
//! Health checks and static files are mounted by the binary.

pub mod cart;
pub mod payment;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::middleware::checkout_rate_limiter;
use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
        .route("/count", get(cart::count))
}

/// Create the payment routes router.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/shipping",
            get(payment::shipping_page).post(payment::save_shipping),
        )
        .route("/checkout", get(payment::checkout_page))
        .route(
            "/complete-order",
            post(payment::complete_order).layer(checkout_rate_limiter()),
        )
        .route("/payment-success", get(payment::payment_success))
        .route("/payment-failed", get(payment::payment_failed))
        .route("/webhook/stripe", post(webhooks::stripe))
        .route("/webhook/yookassa", post(webhooks::yookassa))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", cart_routes())
        .nest("/payment", payment_routes())
}
