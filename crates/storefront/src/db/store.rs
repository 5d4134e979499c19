//! `PostgreSQL` implementation of [`OrderStore`].

use sqlx::PgPool;

use lavka_core::{IdempotencyKey, OrderId, OrderStatus, PaymentProvider, UserId};

use super::{OrderRepository, RepositoryError, ShippingRepository, StatusUpdate};
use crate::models::{Order, OrderDraft, OrderItem, ShippingAddress, ShippingDetails};
use crate::services::OrderStore;

/// Checkout persistence backed by the storefront database.
#[derive(Clone)]
pub struct PgCheckoutStore {
    pool: PgPool,
}

impl PgCheckoutStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl OrderStore for PgCheckoutStore {
    async fn shipping_for_user(
        &self,
        user_id: UserId,
        details: &ShippingDetails,
    ) -> Result<ShippingAddress, RepositoryError> {
        ShippingRepository::new(&self.pool)
            .get_or_create_for_user(user_id, details)
            .await
    }

    async fn create_guest_shipping(
        &self,
        details: &ShippingDetails,
    ) -> Result<ShippingAddress, RepositoryError> {
        ShippingRepository::new(&self.pool).create_guest(details).await
    }

    async fn find_order_by_idempotency_key(
        &self,
        key: IdempotencyKey,
    ) -> Result<Option<Order>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .find_by_idempotency_key(key)
            .await
    }

    async fn create_order(
        &self,
        draft: &OrderDraft,
    ) -> Result<(Order, Vec<OrderItem>), RepositoryError> {
        OrderRepository::new(&self.pool).create_with_items(draft).await
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        OrderRepository::new(&self.pool).items(order_id).await
    }

    async fn record_payment(
        &self,
        order_id: OrderId,
        provider: PaymentProvider,
        reference: &str,
        confirmation_url: &str,
    ) -> Result<Order, RepositoryError> {
        OrderRepository::new(&self.pool)
            .record_payment(order_id, provider, reference, confirmation_url)
            .await
    }

    async fn mark_failed(&self, order_id: OrderId) -> Result<Order, RepositoryError> {
        OrderRepository::new(&self.pool).mark_failed(order_id).await
    }

    async fn set_status_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
        status: OrderStatus,
    ) -> Result<StatusUpdate, RepositoryError> {
        OrderRepository::new(&self.pool)
            .set_status_by_reference(provider, reference, status)
            .await
    }
}
