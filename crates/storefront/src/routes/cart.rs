//! Cart route handlers.
//!
//! Cart operations use HTMX for dynamic updates without full page reloads.
//! The cart itself is serialized into the session; prices are read from the
//! product table when a line is added.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::State,
    http::StatusCode,
    response::{AppendHeaders, Html, IntoResponse, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use lavka_core::ProductId;

use crate::db::ProductRepository;
use crate::filters;
use crate::models::{Cart, CartLine, session_keys};
use crate::state::AppState;

/// Cart item display data for templates.
#[derive(Clone)]
pub struct CartItemView {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub price: String,
    pub line_price: String,
}

/// Cart display data for templates.
#[derive(Clone)]
pub struct CartView {
    pub items: Vec<CartItemView>,
    pub subtotal: String,
    pub item_count: u32,
}

impl From<&CartLine> for CartItemView {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product_id,
            name: line.name.clone(),
            quantity: line.quantity,
            price: line.unit_price.to_string(),
            line_price: line
                .line_total()
                .map(|total| total.to_string())
                .unwrap_or_default(),
        }
    }
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        Self {
            items: cart.lines().iter().map(CartItemView::from).collect(),
            subtotal: cart
                .total_price()
                .map(|total| total.to_string())
                .unwrap_or_default(),
            item_count: cart.item_count(),
        }
    }
}

// =============================================================================
// Session Helpers
// =============================================================================

/// Load the cart from the session. A missing or unreadable cart is empty.
pub(crate) async fn load_cart(session: &Session) -> Cart {
    match session.get::<Cart>(session_keys::CART).await {
        Ok(cart) => cart.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("Failed to read cart from session: {e}");
            Cart::new()
        }
    }
}

/// Save the cart to the session.
///
/// A changed cart is a new checkout, so the idempotency key minted for the
/// old contents is dropped with it.
pub(crate) async fn save_cart(
    session: &Session,
    cart: &Cart,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::CART, cart).await?;
    session
        .remove_value(session_keys::CHECKOUT_IDEMPOTENCY_KEY)
        .await?;
    Ok(())
}

/// Add to cart form data.
#[derive(Debug, Deserialize)]
pub struct AddToCartForm {
    pub product_id: ProductId,
    pub quantity: Option<u32>,
}

/// Update cart form data.
#[derive(Debug, Deserialize)]
pub struct UpdateCartForm {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Remove from cart form data.
#[derive(Debug, Deserialize)]
pub struct RemoveFromCartForm {
    pub product_id: ProductId,
}

/// Cart page template.
#[derive(Template, WebTemplate)]
#[template(path = "cart/show.html")]
pub struct CartShowTemplate {
    pub cart: CartView,
}

/// Cart items fragment template (for HTMX).
#[derive(Template, WebTemplate)]
#[template(path = "partials/cart_items.html")]
pub struct CartItemsTemplate {
    pub cart: CartView,
}

/// Cart count badge fragment template (for HTMX).
#[derive(Template, WebTemplate)]
#[template(path = "partials/cart_count.html")]
pub struct CartCountTemplate {
    pub count: u32,
}

fn cart_error(message: &'static str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Html(format!("<span class=\"text-red-500\">{message}</span>")),
    )
        .into_response()
}

/// Display cart page.
#[instrument(skip(session))]
pub async fn show(session: Session) -> impl IntoResponse {
    let cart = load_cart(&session).await;
    CartShowTemplate {
        cart: CartView::from(&cart),
    }
}

/// Add item to cart (HTMX).
///
/// Returns the new count badge with an HTMX trigger so other fragments refresh.
#[instrument(skip(state, session))]
pub async fn add(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<AddToCartForm>,
) -> Response {
    let product = match ProductRepository::new(state.pool())
        .get_by_id(form.product_id)
        .await
    {
        Ok(Some(product)) if product.available => product,
        Ok(_) => return cart_error("This product is not available"),
        Err(e) => {
            tracing::error!("Failed to load product {}: {e}", form.product_id);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<span class=\"text-red-500\">Error adding to cart</span>"),
            )
                .into_response();
        }
    };

    let mut cart = load_cart(&session).await;
    cart.add(&product, form.quantity.unwrap_or(1));

    if let Err(e) = save_cart(&session, &cart).await {
        tracing::error!("Failed to save cart to session: {e}");
        return cart_error("Error adding to cart");
    }

    (
        AppendHeaders([("HX-Trigger", "cart-updated")]),
        CartCountTemplate {
            count: cart.item_count(),
        },
    )
        .into_response()
}

/// Update cart item quantity (HTMX). A zero quantity removes the line.
#[instrument(skip(session))]
pub async fn update(session: Session, Form(form): Form<UpdateCartForm>) -> Response {
    let mut cart = load_cart(&session).await;
    if !cart.update(form.product_id, form.quantity) {
        return CartItemsTemplate {
            cart: CartView::from(&cart),
        }
        .into_response();
    }

    if let Err(e) = save_cart(&session, &cart).await {
        tracing::error!("Failed to update cart: {e}");
    }

    (
        AppendHeaders([("HX-Trigger", "cart-updated")]),
        CartItemsTemplate {
            cart: CartView::from(&cart),
        },
    )
        .into_response()
}

/// Remove item from cart (HTMX).
#[instrument(skip(session))]
pub async fn remove(session: Session, Form(form): Form<RemoveFromCartForm>) -> Response {
    let mut cart = load_cart(&session).await;
    if cart.remove(form.product_id)
        && let Err(e) = save_cart(&session, &cart).await
    {
        tracing::error!("Failed to remove from cart: {e}");
    }

    (
        AppendHeaders([("HX-Trigger", "cart-updated")]),
        CartItemsTemplate {
            cart: CartView::from(&cart),
        },
    )
        .into_response()
}

/// Get cart count badge (HTMX).
#[instrument(skip(session))]
pub async fn count(session: Session) -> impl IntoResponse {
    CartCountTemplate {
        count: load_cart(&session).await.item_count(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use lavka_core::{Currency, IdempotencyKey, Money};
    use rust_decimal::Decimal;
    use tower_sessions::MemoryStore;

    use super::*;
    use crate::models::Product;

    fn session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    fn tea() -> Product {
        Product {
            id: ProductId::new(1),
            name: "Ivan-chai".to_string(),
            price: Money::new(Decimal::new(450, 2), Currency::Usd),
            available: true,
            created_at: Utc::now(),
        }
    }

    async fn stored_key(session: &Session) -> Option<IdempotencyKey> {
        session
            .get::<IdempotencyKey>(session_keys::CHECKOUT_IDEMPOTENCY_KEY)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_saving_cart_retires_checkout_key() {
        let session = session();
        session
            .insert(session_keys::CHECKOUT_IDEMPOTENCY_KEY, IdempotencyKey::generate())
            .await
            .unwrap();

        let mut cart = Cart::new();
        cart.add(&tea(), 2);
        save_cart(&session, &cart).await.unwrap();

        assert!(stored_key(&session).await.is_none());
        assert_eq!(load_cart(&session).await.item_count(), 2);
    }

    #[tokio::test]
    async fn test_update_and_remove_retire_checkout_key() {
        let session = session();
        let mut cart = Cart::new();
        cart.add(&tea(), 1);
        save_cart(&session, &cart).await.unwrap();

        session
            .insert(session_keys::CHECKOUT_IDEMPOTENCY_KEY, IdempotencyKey::generate())
            .await
            .unwrap();
        update(
            session.clone(),
            Form(UpdateCartForm {
                product_id: ProductId::new(1),
                quantity: 3,
            }),
        )
        .await;
        assert!(stored_key(&session).await.is_none());
        assert_eq!(load_cart(&session).await.item_count(), 3);

        session
            .insert(session_keys::CHECKOUT_IDEMPOTENCY_KEY, IdempotencyKey::generate())
            .await
            .unwrap();
        remove(
            session.clone(),
            Form(RemoveFromCartForm {
                product_id: ProductId::new(1),
            }),
        )
        .await;
        assert!(stored_key(&session).await.is_none());
        assert!(load_cart(&session).await.is_empty());
    }
}
