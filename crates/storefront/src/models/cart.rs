//! Session-scoped shopping cart.
//!
//! The cart is serialized into the visitor's session under
//! [`keys::CART`](super::session::keys::CART). It is created on the first add,
//! cleared by the payment success page, and dropped with the session.
//! Nothing is written to the database until checkout.

use serde::{Deserialize, Serialize};

use lavka_core::{Currency, Money, MoneyError, ProductId};

use super::Product;

/// Largest quantity a single cart line can hold.
pub const MAX_LINE_QUANTITY: u32 = 99;

/// One product in the cart with the unit price captured at add time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl CartLine {
    /// Unit price times quantity.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`] if the multiplication overflows.
    pub fn line_total(&self) -> Result<Money, MoneyError> {
        self.unit_price.times(self.quantity)
    }
}

/// The visitor's cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Add `quantity` of a product, merging with an existing line.
    ///
    /// The merged quantity is clamped to [`MAX_LINE_QUANTITY`]; a zero
    /// quantity counts as one.
    pub fn add(&mut self, product: &Product, quantity: u32) {
        let quantity = quantity.max(1);
        if let Some(line) = self.line_mut(product.id) {
            line.quantity = line.quantity.saturating_add(quantity).min(MAX_LINE_QUANTITY);
            return;
        }
        self.lines.push(CartLine {
            product_id: product.id,
            name: product.name.clone(),
            unit_price: product.price,
            quantity: quantity.min(MAX_LINE_QUANTITY),
        });
    }

    /// Set the quantity of a line. Zero removes it.
    ///
    /// Returns `false` if the product is not in the cart.
    pub fn update(&mut self, product_id: ProductId, quantity: u32) -> bool {
        if quantity == 0 {
            return self.remove(product_id);
        }
        match self.line_mut(product_id) {
            Some(line) => {
                line.quantity = quantity.min(MAX_LINE_QUANTITY);
                true
            }
            None => false,
        }
    }

    /// Remove a line. Returns `false` if the product is not in the cart.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| line.product_id != product_id);
        self.lines.len() != before
    }

    /// Drop every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total number of units across all lines (the header badge count).
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Sum of every line total.
    ///
    /// An empty cart totals zero in the catalog currency.
    ///
    /// # Errors
    ///
    /// Returns a [`MoneyError`] if lines mix currencies or the sum overflows.
    pub fn total_price(&self) -> Result<Money, MoneyError> {
        let currency = self
            .lines
            .first()
            .map_or(Currency::default(), |line| line.unit_price.currency);
        self.lines
            .iter()
            .try_fold(Money::zero(currency), |acc, line| {
                acc.checked_add(line.line_total()?)
            })
    }

    fn line_mut(&mut self, product_id: ProductId) -> Option<&mut CartLine> {
        self.lines
            .iter_mut()
            .find(|line| line.product_id == product_id)
    }
}

impl<'a> IntoIterator for &'a Cart {
    type Item = &'a CartLine;
    type IntoIter = std::slice::Iter<'a, CartLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;

    fn product(id: i32, price: &str) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            price: Money::new(Decimal::from_str(price).unwrap(), Currency::Usd),
            available: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_merges_lines() {
        let mut cart = Cart::new();
        let tea = product(1, "4.50");
        cart.add(&tea, 2);
        cart.add(&tea, 3);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.item_count(), 5);
    }

    #[test]
    fn test_add_clamps_quantity() {
        let mut cart = Cart::new();
        let tea = product(1, "4.50");
        cart.add(&tea, 0);
        assert_eq!(cart.item_count(), 1);
        cart.add(&tea, 500);
        assert_eq!(cart.item_count(), MAX_LINE_QUANTITY);
    }

    #[test]
    fn test_update_and_remove() {
        let mut cart = Cart::new();
        cart.add(&product(1, "1.00"), 1);
        cart.add(&product(2, "2.00"), 1);

        assert!(cart.update(ProductId::new(2), 4));
        assert_eq!(cart.item_count(), 5);
        assert!(cart.update(ProductId::new(1), 0));
        assert_eq!(cart.lines().len(), 1);
        assert!(!cart.remove(ProductId::new(1)));
        assert!(!cart.update(ProductId::new(9), 3));
    }

    #[test]
    fn test_total_price() {
        let mut cart = Cart::new();
        cart.add(&product(1, "19.99"), 2);
        cart.add(&product(2, "5.01"), 1);
        let total = cart.total_price().unwrap();
        assert_eq!(total.amount, Decimal::from_str("44.99").unwrap());
        assert_eq!(Cart::new().total_price().unwrap().amount, Decimal::ZERO);
    }

    #[test]
    fn test_session_serialization_keeps_prices() {
        let mut cart = Cart::new();
        cart.add(&product(7, "12.30"), 2);
        let json = serde_json::to_value(&cart).unwrap();
        let back: Cart = serde_json::from_value(json).unwrap();
        assert_eq!(back, cart);
    }
}
