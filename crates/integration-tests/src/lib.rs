//! Integration test support for Lavka.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p lavka-integration-tests
//! ```
//!
//! The checkout service only sees its seams (`OrderStore`, `CardGateway`,
//! `RegionalGateway`), so the fakes here let the whole flow run without a
//! database or network.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rust_decimal::Decimal;

use lavka_core::{
    Currency, Email, IdempotencyKey, Money, OrderId, OrderItemId, OrderStatus, PaymentProvider,
    ProductId, ShippingAddressId, UserId,
};
use lavka_storefront::db::{RepositoryError, StatusUpdate};
use lavka_storefront::models::{
    Cart, Order, OrderDraft, OrderItem, Product, ShippingAddress, ShippingDetails,
};
use lavka_storefront::payments::stripe::StripeEvent;
use lavka_storefront::payments::yookassa::Notification;
use lavka_storefront::payments::{
    CardCheckoutRequest, CardGateway, HostedCheckout, PaymentError, RegionalGateway,
    RegionalPayment, RegionalPaymentRequest, RegionalPaymentStatus,
};
use lavka_storefront::services::{CheckoutSettings, OrderStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Fixtures
// =============================================================================

/// A catalog product priced in dollars. `cents` is the unit price.
#[must_use]
pub fn product(id: i32, name: &str, cents: i64) -> Product {
    Product {
        id: ProductId::new(id),
        name: name.to_string(),
        price: Money::new(Decimal::new(cents, 2), Currency::Usd),
        available: true,
        created_at: Utc::now(),
    }
}

/// A cart holding `quantity` of each product.
#[must_use]
pub fn cart_with(lines: &[(&Product, u32)]) -> Cart {
    let mut cart = Cart::new();
    for (product, quantity) in lines {
        cart.add(product, *quantity);
    }
    cart
}

/// Valid shipping details for `name`.
///
/// # Panics
///
/// Panics if `name` does not make a valid email local part.
#[must_use]
pub fn shipping(name: &str) -> ShippingDetails {
    ShippingDetails {
        name: name.to_string(),
        email: Email::parse(&format!("{}@example.com", name.to_lowercase()))
            .expect("fixture email is valid"),
        street_address: "12 Nevsky Prospekt".to_string(),
        apartment_address: Some("Apt 4".to_string()),
        country: "Russia".to_string(),
        zip: "191186".to_string(),
    }
}

/// Settings matching the storefront defaults.
#[must_use]
pub fn settings() -> CheckoutSettings {
    CheckoutSettings {
        success_url: "http://localhost:3000/payment/payment-success".to_string(),
        cancel_url: "http://localhost:3000/payment/payment-failed".to_string(),
        card_currency: Currency::Usd,
        conversion_rate: Decimal::from(93),
        test_mode: true,
        description: "Товары в корзине".to_string(),
    }
}

/// A Stripe `checkout.session.*` event for `session_id`.
///
/// # Panics
///
/// Panics if the fields do not form a valid event.
#[must_use]
pub fn stripe_event(kind: &str, session_id: &str, payment_status: &str) -> StripeEvent {
    serde_json::from_value(serde_json::json!({
        "id": format!("evt_{session_id}"),
        "type": kind,
        "data": {
            "object": {
                "id": session_id,
                "payment_status": payment_status,
            }
        }
    }))
    .expect("fixture event is valid")
}

/// A YooKassa notification about `payment_id`.
///
/// # Panics
///
/// Panics if the fields do not form a valid notification.
#[must_use]
pub fn yookassa_notification(event: &str, payment_id: &str) -> Notification {
    serde_json::from_value(serde_json::json!({
        "type": "notification",
        "event": event,
        "object": { "id": payment_id, "status": "succeeded" }
    }))
    .expect("fixture notification is valid")
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
struct StoreState {
    next_id: i32,
    addresses: Vec<ShippingAddress>,
    orders: Vec<Order>,
    items: Vec<OrderItem>,
}

impl StoreState {
    const fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn order_mut(&mut self, order_id: OrderId) -> Result<&mut Order, RepositoryError> {
        self.orders
            .iter_mut()
            .find(|order| order.id == order_id)
            .ok_or(RepositoryError::NotFound)
    }

    fn insert_address(
        &mut self,
        user_id: Option<UserId>,
        details: &ShippingDetails,
    ) -> ShippingAddress {
        let now = Utc::now();
        let address = ShippingAddress {
            id: ShippingAddressId::new(self.next_id()),
            user_id,
            details: details.clone(),
            created_at: now,
            updated_at: now,
        };
        self.addresses.push(address.clone());
        address
    }
}

/// [`OrderStore`] over plain vectors, enforcing the same rules as the
/// database: unique idempotency keys, validated drafts and legal status
/// transitions.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Save an address for `user_id` as the shipping page would.
    pub fn save_user_address(&self, user_id: UserId, details: &ShippingDetails) -> ShippingAddress {
        lock(&self.state).insert_address(Some(user_id), details)
    }

    /// Set an order's status directly, as a webhook would.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` for an unknown order.
    pub fn force_status(&self, order_id: OrderId, status: OrderStatus) -> Result<(), RepositoryError> {
        lock(&self.state).order_mut(order_id)?.status = status;
        Ok(())
    }

    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        lock(&self.state).orders.clone()
    }

    #[must_use]
    pub fn items(&self) -> Vec<OrderItem> {
        lock(&self.state).items.clone()
    }

    #[must_use]
    pub fn addresses(&self) -> Vec<ShippingAddress> {
        lock(&self.state).addresses.clone()
    }
}

impl OrderStore for InMemoryStore {
    async fn shipping_for_user(
        &self,
        user_id: UserId,
        details: &ShippingDetails,
    ) -> Result<ShippingAddress, RepositoryError> {
        let mut state = lock(&self.state);
        if let Some(existing) = state
            .addresses
            .iter()
            .find(|address| address.user_id == Some(user_id))
        {
            return Ok(existing.clone());
        }
        Ok(state.insert_address(Some(user_id), details))
    }

    async fn create_guest_shipping(
        &self,
        details: &ShippingDetails,
    ) -> Result<ShippingAddress, RepositoryError> {
        Ok(lock(&self.state).insert_address(None, details))
    }

    async fn find_order_by_idempotency_key(
        &self,
        key: IdempotencyKey,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(lock(&self.state)
            .orders
            .iter()
            .find(|order| order.idempotency_key == Some(key))
            .cloned())
    }

    async fn create_order(
        &self,
        draft: &OrderDraft,
    ) -> Result<(Order, Vec<OrderItem>), RepositoryError> {
        draft
            .validate()
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid order draft: {e}")))?;

        let mut state = lock(&self.state);
        if state
            .orders
            .iter()
            .any(|order| order.idempotency_key == Some(draft.idempotency_key))
        {
            return Err(RepositoryError::Conflict(
                "order with this idempotency key already exists".to_string(),
            ));
        }

        let now = Utc::now();
        let order = Order {
            id: OrderId::new(state.next_id()),
            user_id: draft.user_id,
            shipping_address_id: draft.shipping_address_id,
            amount: draft.amount,
            status: OrderStatus::Pending,
            payment_provider: None,
            payment_reference: None,
            confirmation_url: None,
            idempotency_key: Some(draft.idempotency_key),
            created_at: now,
            updated_at: now,
        };

        let mut items = Vec::with_capacity(draft.items.len());
        for item in &draft.items {
            items.push(OrderItem {
                id: OrderItemId::new(state.next_id()),
                order_id: order.id,
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                price: item.price,
                quantity: item.quantity,
                user_id: draft.user_id,
            });
        }

        state.orders.push(order.clone());
        state.items.extend(items.iter().cloned());
        Ok((order, items))
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        Ok(lock(&self.state)
            .items
            .iter()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn record_payment(
        &self,
        order_id: OrderId,
        provider: PaymentProvider,
        reference: &str,
        confirmation_url: &str,
    ) -> Result<Order, RepositoryError> {
        let mut state = lock(&self.state);
        let order = state.order_mut(order_id)?;
        if !order.status.can_transition_to(OrderStatus::AwaitingPayment) {
            return Err(RepositoryError::Conflict(format!(
                "order {order_id} is {}",
                order.status
            )));
        }
        order.status = OrderStatus::AwaitingPayment;
        order.payment_provider = Some(provider);
        order.payment_reference = Some(reference.to_string());
        order.confirmation_url = Some(confirmation_url.to_string());
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn mark_failed(&self, order_id: OrderId) -> Result<Order, RepositoryError> {
        let mut state = lock(&self.state);
        let order = state.order_mut(order_id)?;
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Failed) {
            return Err(RepositoryError::Conflict(format!(
                "order {order_id} is {}",
                order.status
            )));
        }
        order.status = OrderStatus::Failed;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn set_status_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
        status: OrderStatus,
    ) -> Result<StatusUpdate, RepositoryError> {
        let mut state = lock(&self.state);
        let order = state
            .orders
            .iter_mut()
            .find(|order| {
                order.payment_provider == Some(provider)
                    && order.payment_reference.as_deref() == Some(reference)
            })
            .ok_or(RepositoryError::NotFound)?;

        if order.status == status {
            return Ok(StatusUpdate::Unchanged(order.clone()));
        }
        if !order.status.can_transition_to(status) {
            return Ok(StatusUpdate::Rejected(order.clone()));
        }
        order.status = status;
        order.updated_at = Utc::now();
        Ok(StatusUpdate::Applied(order.clone()))
    }
}

// =============================================================================
// Recording gateways
// =============================================================================

/// Card gateway that records requests and answers with fake sessions.
#[derive(Default)]
pub struct RecordingCardGateway {
    requests: Mutex<Vec<(CardCheckoutRequest, IdempotencyKey)>>,
    fail_next: Mutex<Option<PaymentError>>,
}

impl RecordingCardGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: PaymentError) {
        *lock(&self.fail_next) = Some(error);
    }

    /// Every session request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<(CardCheckoutRequest, IdempotencyKey)> {
        lock(&self.requests).clone()
    }
}

impl CardGateway for RecordingCardGateway {
    async fn create_checkout_session(
        &self,
        request: &CardCheckoutRequest,
        idempotency_key: IdempotencyKey,
    ) -> Result<HostedCheckout, PaymentError> {
        let mut requests = lock(&self.requests);
        requests.push((request.clone(), idempotency_key));
        if let Some(error) = lock(&self.fail_next).take() {
            return Err(error);
        }

        let id = format!("cs_test_{}", requests.len());
        Ok(HostedCheckout {
            url: format!("https://checkout.stripe.com/c/pay/{id}"),
            id,
        })
    }
}

/// Regional gateway that deduplicates on the idempotency key like the real
/// provider does.
#[derive(Default)]
pub struct RecordingRegionalGateway {
    requests: Mutex<Vec<(RegionalPaymentRequest, IdempotencyKey)>>,
    payments: Mutex<Vec<(IdempotencyKey, RegionalPayment)>>,
    fail_next: Mutex<Option<PaymentError>>,
}

impl RecordingRegionalGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: PaymentError) {
        *lock(&self.fail_next) = Some(error);
    }

    /// Every create request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<(RegionalPaymentRequest, IdempotencyKey)> {
        lock(&self.requests).clone()
    }

    /// Distinct remote payments created.
    #[must_use]
    pub fn payments(&self) -> Vec<RegionalPayment> {
        lock(&self.payments)
            .iter()
            .map(|(_, payment)| payment.clone())
            .collect()
    }

    /// Change the provider-side status of a payment.
    pub fn settle(&self, payment_id: &str, status: RegionalPaymentStatus) {
        if let Some((_, payment)) = lock(&self.payments)
            .iter_mut()
            .find(|(_, payment)| payment.id == payment_id)
        {
            payment.status = status;
        }
    }
}

impl RegionalGateway for RecordingRegionalGateway {
    async fn create_payment(
        &self,
        request: &RegionalPaymentRequest,
        idempotency_key: IdempotencyKey,
    ) -> Result<RegionalPayment, PaymentError> {
        lock(&self.requests).push((request.clone(), idempotency_key));
        if let Some(error) = lock(&self.fail_next).take() {
            return Err(error);
        }

        let mut payments = lock(&self.payments);
        if let Some((_, existing)) = payments.iter().find(|(key, _)| *key == idempotency_key) {
            return Ok(existing.clone());
        }

        let id = format!("2d8f7a3b-000f-5000-9000-{:012}", payments.len() + 1);
        let payment = RegionalPayment {
            confirmation_url: Some(format!(
                "https://yoomoney.ru/checkout/payments/v2/contract?orderId={id}"
            )),
            id,
            status: RegionalPaymentStatus::Pending,
        };
        payments.push((idempotency_key, payment.clone()));
        Ok(payment)
    }

    async fn get_payment(&self, payment_id: &str) -> Result<RegionalPayment, PaymentError> {
        lock(&self.payments)
            .iter()
            .find(|(_, payment)| payment.id == payment_id)
            .map(|(_, payment)| payment.clone())
            .ok_or_else(|| PaymentError::Provider {
                status: 404,
                message: format!("payment {payment_id} not found"),
            })
    }
}
