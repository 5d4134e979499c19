//! Durable order records and the draft they are built from.

use chrono::{DateTime, Utc};
use serde::Serialize;

use lavka_core::{
    IdempotencyKey, Money, MoneyError, OrderId, OrderItemId, OrderStatus, PaymentProvider,
    ProductId, ShippingAddressId, UserId,
};

use super::Cart;

/// Errors that make a draft unfit for persistence.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderDraftError {
    #[error("order has no items")]
    NoItems,

    #[error("item {product_id} has zero quantity")]
    ZeroQuantity { product_id: ProductId },

    #[error("order amount {amount} does not match item total {items_total}")]
    AmountMismatch { amount: Money, items_total: Money },

    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// An order as stored in `storefront."order"`.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: Option<UserId>,
    pub shipping_address_id: ShippingAddressId,
    pub amount: Money,
    pub status: OrderStatus,
    pub payment_provider: Option<PaymentProvider>,
    pub payment_reference: Option<String>,
    pub confirmation_url: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether the browser can be sent straight to an existing provider page.
    #[must_use]
    pub fn resumable_url(&self) -> Option<&str> {
        match self.status {
            OrderStatus::AwaitingPayment => self.confirmation_url.as_deref(),
            _ => None,
        }
    }
}

/// One purchased line.
#[derive(Debug, Clone, Serialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub price: Money,
    pub quantity: u32,
    pub user_id: Option<UserId>,
}

/// A line waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItemDraft {
    pub product_id: ProductId,
    pub product_name: String,
    pub price: Money,
    pub quantity: u32,
}

impl OrderItemDraft {
    /// Price times quantity.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`] if the multiplication overflows.
    pub fn line_total(&self) -> Result<Money, MoneyError> {
        self.price.times(self.quantity)
    }
}

/// An order and its items before they reach the database.
///
/// The amount is always derived from the items, and [`OrderDraft::validate`]
/// re-checks the sum so a hand-built draft cannot persist a wrong total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub user_id: Option<UserId>,
    pub shipping_address_id: ShippingAddressId,
    pub amount: Money,
    pub idempotency_key: IdempotencyKey,
    pub items: Vec<OrderItemDraft>,
}

impl OrderDraft {
    /// Build a draft from the session cart.
    ///
    /// # Errors
    ///
    /// Returns an [`OrderDraftError`] if the cart is empty or its lines cannot
    /// be summed.
    pub fn from_cart(
        cart: &Cart,
        user_id: Option<UserId>,
        shipping_address_id: ShippingAddressId,
        idempotency_key: IdempotencyKey,
    ) -> Result<Self, OrderDraftError> {
        let items: Vec<OrderItemDraft> = cart
            .lines()
            .iter()
            .map(|line| OrderItemDraft {
                product_id: line.product_id,
                product_name: line.name.clone(),
                price: line.unit_price,
                quantity: line.quantity,
            })
            .collect();

        let draft = Self {
            user_id,
            shipping_address_id,
            amount: cart.total_price()?,
            idempotency_key,
            items,
        };
        draft.validate()?;
        Ok(draft)
    }

    /// Sum of every item's price times quantity.
    ///
    /// # Errors
    ///
    /// Returns [`OrderDraftError::NoItems`] for an empty draft or a
    /// [`MoneyError`] if the items cannot be summed.
    pub fn items_total(&self) -> Result<Money, OrderDraftError> {
        let first = self.items.first().ok_or(OrderDraftError::NoItems)?;
        let total = self
            .items
            .iter()
            .try_fold(Money::zero(first.price.currency), |acc, item| {
                acc.checked_add(item.line_total()?)
            })?;
        Ok(total)
    }

    /// Check that the draft is non-empty, every quantity is positive and the
    /// amount equals the item total.
    ///
    /// # Errors
    ///
    /// Returns the first [`OrderDraftError`] found.
    pub fn validate(&self) -> Result<(), OrderDraftError> {
        if let Some(item) = self.items.iter().find(|item| item.quantity == 0) {
            return Err(OrderDraftError::ZeroQuantity {
                product_id: item.product_id,
            });
        }
        let items_total = self.items_total()?;
        if items_total != self.amount {
            return Err(OrderDraftError::AmountMismatch {
                amount: self.amount,
                items_total,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use lavka_core::Currency;
    use rust_decimal::Decimal;

    use super::*;
    use crate::models::Product;

    fn usd(s: &str) -> Money {
        Money::new(Decimal::from_str(s).unwrap(), Currency::Usd)
    }

    fn cart() -> Cart {
        let mut cart = Cart::new();
        for (id, price, qty) in [(1, "10.00", 2), (2, "3.35", 3)] {
            let product = Product {
                id: ProductId::new(id),
                name: format!("Item {id}"),
                price: usd(price),
                available: true,
                created_at: Utc::now(),
            };
            cart.add(&product, qty);
        }
        cart
    }

    #[test]
    fn test_from_cart_sums_items() {
        let draft = OrderDraft::from_cart(
            &cart(),
            None,
            ShippingAddressId::new(1),
            IdempotencyKey::generate(),
        )
        .unwrap();
        assert_eq!(draft.items.len(), 2);
        assert_eq!(draft.amount, usd("30.05"));
        assert!(draft.user_id.is_none());
    }

    #[test]
    fn test_from_empty_cart() {
        let result = OrderDraft::from_cart(
            &Cart::new(),
            Some(UserId::new(4)),
            ShippingAddressId::new(1),
            IdempotencyKey::generate(),
        );
        assert_eq!(result.unwrap_err(), OrderDraftError::NoItems);
    }

    #[test]
    fn test_validate_catches_tampered_amount() {
        let mut draft = OrderDraft::from_cart(
            &cart(),
            None,
            ShippingAddressId::new(1),
            IdempotencyKey::generate(),
        )
        .unwrap();
        draft.amount = usd("1.00");
        assert!(matches!(
            draft.validate(),
            Err(OrderDraftError::AmountMismatch { .. })
        ));

        draft.amount = usd("30.05");
        draft.items[0].quantity = 0;
        assert!(matches!(
            draft.validate(),
            Err(OrderDraftError::ZeroQuantity { .. })
        ));
    }
}
