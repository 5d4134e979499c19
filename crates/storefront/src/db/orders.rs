//! Order repository.
//!
//! Orders and their items are written together in one transaction. Status
//! changes lock the order row and go through
//! [`OrderStatus::can_transition_to`], so a late webhook cannot move a paid
//! order back.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use lavka_core::{
    Currency, IdempotencyKey, Money, OrderId, OrderItemId, OrderStatus, PaymentProvider,
    ProductId, ShippingAddressId, UserId,
};

use super::RepositoryError;
use crate::models::{Order, OrderDraft, OrderItem};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: Option<UserId>,
    shipping_address_id: ShippingAddressId,
    amount: Decimal,
    currency: String,
    status: OrderStatus,
    payment_provider: Option<PaymentProvider>,
    payment_reference: Option<String>,
    confirmation_url: Option<String>,
    idempotency_key: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let currency = Currency::from_code(&row.currency).ok_or_else(|| {
            RepositoryError::DataCorruption(format!("unknown currency in database: {}", row.currency))
        })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            shipping_address_id: row.shipping_address_id,
            amount: Money::new(row.amount, currency),
            status: row.status,
            payment_provider: row.payment_provider,
            payment_reference: row.payment_reference,
            confirmation_url: row.confirmation_url,
            idempotency_key: row.idempotency_key.map(IdempotencyKey::from_uuid),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: OrderItemId,
    order_id: OrderId,
    product_id: ProductId,
    product_name: String,
    price: Decimal,
    quantity: i32,
    user_id: Option<UserId>,
}

impl OrderItemRow {
    fn into_item(self, currency: Currency) -> Result<OrderItem, RepositoryError> {
        let quantity = u32::try_from(self.quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "negative quantity on order item {}",
                self.id
            ))
        })?;

        Ok(OrderItem {
            id: self.id,
            order_id: self.order_id,
            product_id: self.product_id,
            product_name: self.product_name,
            price: Money::new(self.price, currency),
            quantity,
            user_id: self.user_id,
        })
    }
}

const ORDER_COLUMNS: &str = "id, user_id, shipping_address_id, amount, currency, status, \
                             payment_provider, payment_reference, confirmation_url, \
                             idempotency_key, created_at, updated_at";

/// Outcome of a status change requested by a provider notification.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    /// The order moved to the requested status.
    Applied(Order),
    /// The order was already in the requested status.
    Unchanged(Order),
    /// The transition is not allowed from the order's current status.
    Rejected(Order),
}

/// Repository for orders and order items.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert an order and all of its items in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the idempotency key is taken.
    /// Returns `RepositoryError::DataCorruption` if the draft fails validation.
    /// Returns `RepositoryError::Database` for other database errors.
    #[instrument(skip(self, draft), fields(items = draft.items.len(), key = %draft.idempotency_key))]
    pub async fn create_with_items(
        &self,
        draft: &OrderDraft,
    ) -> Result<(Order, Vec<OrderItem>), RepositoryError> {
        draft
            .validate()
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid order draft: {e}")))?;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            INSERT INTO storefront.order
                (user_id, shipping_address_id, amount, currency, idempotency_key)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(draft.user_id)
        .bind(draft.shipping_address_id)
        .bind(draft.amount.amount)
        .bind(draft.amount.currency.code())
        .bind(draft.idempotency_key.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "order with this idempotency key"))?;
        let order = Order::try_from(row)?;

        let mut items = Vec::with_capacity(draft.items.len());
        for item in &draft.items {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                RepositoryError::DataCorruption(format!("quantity {} out of range", item.quantity))
            })?;

            let row = sqlx::query_as::<_, OrderItemRow>(
                r"
                INSERT INTO storefront.order_item
                    (order_id, product_id, product_name, price, quantity, user_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, order_id, product_id, product_name, price, quantity, user_id
                ",
            )
            .bind(order.id)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(item.price.amount)
            .bind(quantity)
            .bind(draft.user_id)
            .fetch_one(&mut *tx)
            .await?;

            items.push(row.into_item(order.amount.currency)?);
        }

        tx.commit().await?;

        tracing::info!(order_id = %order.id, "Order created");
        Ok((order, items))
    }

    /// Get an order by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.order WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    /// Find the order created by a checkout submission.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self))]
    pub async fn find_by_idempotency_key(
        &self,
        key: IdempotencyKey,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.order WHERE idempotency_key = $1"
        ))
        .bind(key.as_uuid())
        .fetch_optional(self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    /// Items of an order in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    #[instrument(skip(self))]
    pub async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        let order = self
            .get_by_id(order_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let rows = sqlx::query_as::<_, OrderItemRow>(
            r"
            SELECT id, order_id, product_id, product_name, price, quantity, user_id
            FROM storefront.order_item
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(order_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_item(order.amount.currency))
            .collect()
    }

    /// Record the provider's answer and move the order to `awaiting_payment`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    /// Returns `RepositoryError::Conflict` if the order is past the point where
    /// a payment can be attached.
    #[instrument(skip(self, confirmation_url))]
    pub async fn record_payment(
        &self,
        order_id: OrderId,
        provider: PaymentProvider,
        reference: &str,
        confirmation_url: &str,
    ) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_by_id(&mut tx, order_id).await?;
        if !current.status.can_transition_to(OrderStatus::AwaitingPayment) {
            return Err(RepositoryError::Conflict(format!(
                "order {order_id} is {}",
                current.status
            )));
        }

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            UPDATE storefront.order
            SET status = 'awaiting_payment',
                payment_provider = $2,
                payment_reference = $3,
                confirmation_url = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(order_id)
        .bind(provider)
        .bind(reference)
        .bind(confirmation_url)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    /// Mark an order whose provider request failed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, order_id: OrderId) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_by_id(&mut tx, order_id).await?;
        if !matches!(current.status, OrderStatus::Pending | OrderStatus::Failed) {
            return Err(RepositoryError::Conflict(format!(
                "order {order_id} is {}",
                current.status
            )));
        }

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            UPDATE storefront.order
            SET status = 'failed', updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    /// Apply a provider-confirmed status to the order holding `reference`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no order carries the reference.
    #[instrument(skip(self))]
    pub async fn set_status_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
        to: OrderStatus,
    ) -> Result<StatusUpdate, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM storefront.order
            WHERE payment_provider = $1 AND payment_reference = $2
            FOR UPDATE
            "
        ))
        .bind(provider)
        .bind(reference)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        let current = Order::try_from(row)?;

        if current.status == to {
            return Ok(StatusUpdate::Unchanged(current));
        }
        if !current.status.can_transition_to(to) {
            tracing::warn!(
                order_id = %current.id,
                from = %current.status,
                to = %to,
                "Ignoring disallowed status transition"
            );
            return Ok(StatusUpdate::Rejected(current));
        }

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            UPDATE storefront.order
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(current.id)
        .bind(to)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let order = Order::try_from(row)?;
        tracing::info!(order_id = %order.id, status = %order.status, "Order status updated");
        Ok(StatusUpdate::Applied(order))
    }
}

async fn lock_by_id(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
) -> Result<Order, RepositoryError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM storefront.order WHERE id = $1 FOR UPDATE"
    ))
    .bind(order_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(RepositoryError::NotFound)?;

    row.try_into()
}
