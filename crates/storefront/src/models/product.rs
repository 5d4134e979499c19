//! Catalog product as seen by the cart.

use chrono::{DateTime, Utc};

use lavka_core::{Money, ProductId};

/// A catalog product.
///
/// The catalog itself is managed elsewhere; the storefront only reads
/// products to price cart lines.
#[derive(Debug, Clone)]
pub struct Product {
    /// Product ID.
    pub id: ProductId,
    /// Display name, also sent to the card gateway as the line item name.
    pub name: String,
    /// Unit price in the catalog currency.
    pub price: Money,
    /// Whether the product can currently be added to a cart.
    pub available: bool,
    /// When the product was created.
    pub created_at: DateTime<Utc>,
}
