//! Integration tests for webhook settlement.
//!
//! Orders are placed through the real checkout service, then provider
//! notifications are applied through `SettlementService`.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use lavka_core::{IdempotencyKey, OrderStatus};
use lavka_integration_tests::{
    InMemoryStore, RecordingCardGateway, RecordingRegionalGateway, cart_with, product, settings,
    shipping, stripe_event, yookassa_notification,
};
use lavka_storefront::db::StatusUpdate;
use lavka_storefront::models::Order;
use lavka_storefront::payments::{PaymentMethod, RegionalPaymentStatus};
use lavka_storefront::services::{
    CheckoutRequest, CheckoutService, CheckoutSettings, Settlement, SettlementError,
    SettlementService,
};

struct Harness {
    store: InMemoryStore,
    card: RecordingCardGateway,
    regional: RecordingRegionalGateway,
    settings: CheckoutSettings,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: InMemoryStore::new(),
            card: RecordingCardGateway::new(),
            regional: RecordingRegionalGateway::new(),
            settings: settings(),
        }
    }

    async fn place(&self, method: PaymentMethod) -> Order {
        let honey = product(1, "Buckwheat honey", 1250);
        CheckoutService::new(&self.store, &self.card, &self.regional, &self.settings)
            .complete(CheckoutRequest {
                user: None,
                shipping: shipping("Olga"),
                method,
                cart: &cart_with(&[(&honey, 2)]),
                idempotency_key: IdempotencyKey::generate(),
            })
            .await
            .unwrap()
            .order
    }

    fn settlement(&self) -> SettlementService<'_, InMemoryStore, RecordingRegionalGateway> {
        SettlementService::new(&self.store, &self.regional)
    }

    fn status_of(&self, order: &Order) -> OrderStatus {
        self.store
            .orders()
            .into_iter()
            .find(|o| o.id == order.id)
            .unwrap()
            .status
    }
}

fn reference(order: &Order) -> &str {
    order.payment_reference.as_deref().unwrap()
}

// =============================================================================
// Stripe
// =============================================================================

#[tokio::test]
async fn test_completed_session_marks_order_paid() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Card).await;

    let settlement = harness
        .settlement()
        .stripe_event(&stripe_event("checkout.session.completed", reference(&order), "paid"))
        .await
        .unwrap();

    assert!(matches!(
        settlement,
        Settlement::Updated(StatusUpdate::Applied(ref o)) if o.status == OrderStatus::Paid
    ));
    assert_eq!(harness.status_of(&order), OrderStatus::Paid);
}

#[tokio::test]
async fn test_completed_but_unpaid_session_is_ignored() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Card).await;

    let settlement = harness
        .settlement()
        .stripe_event(&stripe_event("checkout.session.completed", reference(&order), "unpaid"))
        .await
        .unwrap();

    assert!(matches!(settlement, Settlement::Ignored));
    assert_eq!(harness.status_of(&order), OrderStatus::AwaitingPayment);
}

#[tokio::test]
async fn test_async_payment_succeeded_marks_order_paid() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Card).await;

    harness
        .settlement()
        .stripe_event(&stripe_event(
            "checkout.session.async_payment_succeeded",
            reference(&order),
            "paid",
        ))
        .await
        .unwrap();

    assert_eq!(harness.status_of(&order), OrderStatus::Paid);
}

#[tokio::test]
async fn test_expired_session_cancels_order() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Card).await;

    harness
        .settlement()
        .stripe_event(&stripe_event("checkout.session.expired", reference(&order), "unpaid"))
        .await
        .unwrap();

    assert_eq!(harness.status_of(&order), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_late_expiry_does_not_cancel_paid_order() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Card).await;
    let settlement = harness.settlement();

    settlement
        .stripe_event(&stripe_event("checkout.session.completed", reference(&order), "paid"))
        .await
        .unwrap();
    let late = settlement
        .stripe_event(&stripe_event("checkout.session.expired", reference(&order), "unpaid"))
        .await
        .unwrap();

    assert!(matches!(late, Settlement::Updated(StatusUpdate::Rejected(_))));
    assert_eq!(harness.status_of(&order), OrderStatus::Paid);
}

#[tokio::test]
async fn test_redelivered_event_leaves_order_unchanged() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Card).await;
    let event = stripe_event("checkout.session.completed", reference(&order), "paid");
    let settlement = harness.settlement();

    settlement.stripe_event(&event).await.unwrap();
    let again = settlement.stripe_event(&event).await.unwrap();

    assert!(matches!(again, Settlement::Updated(StatusUpdate::Unchanged(_))));
    assert_eq!(harness.status_of(&order), OrderStatus::Paid);
}

#[tokio::test]
async fn test_unknown_session_is_acknowledged() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Card).await;

    let settlement = harness
        .settlement()
        .stripe_event(&stripe_event("checkout.session.completed", "cs_live_elsewhere", "paid"))
        .await
        .unwrap();

    assert!(matches!(settlement, Settlement::UnknownReference));
    assert_eq!(harness.status_of(&order), OrderStatus::AwaitingPayment);
}

#[tokio::test]
async fn test_stripe_event_does_not_touch_regional_order() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Regional).await;

    let settlement = harness
        .settlement()
        .stripe_event(&stripe_event("checkout.session.completed", reference(&order), "paid"))
        .await
        .unwrap();

    assert!(matches!(settlement, Settlement::UnknownReference));
    assert_eq!(harness.status_of(&order), OrderStatus::AwaitingPayment);
}

// =============================================================================
// YooKassa
// =============================================================================

#[tokio::test]
async fn test_regional_notification_uses_fetched_status() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Regional).await;
    let notification = yookassa_notification("payment.succeeded", reference(&order));

    // The notification claims success, but the provider still reports pending.
    let settlement = harness
        .settlement()
        .regional_notification(&notification)
        .await
        .unwrap();
    assert!(matches!(settlement, Settlement::Ignored));
    assert_eq!(harness.status_of(&order), OrderStatus::AwaitingPayment);

    harness
        .regional
        .settle(reference(&order), RegionalPaymentStatus::Succeeded);
    harness
        .settlement()
        .regional_notification(&notification)
        .await
        .unwrap();
    assert_eq!(harness.status_of(&order), OrderStatus::Paid);
}

#[tokio::test]
async fn test_regional_cancellation_cancels_order() {
    let harness = Harness::new();
    let order = harness.place(PaymentMethod::Regional).await;
    harness
        .regional
        .settle(reference(&order), RegionalPaymentStatus::Canceled);

    harness
        .settlement()
        .regional_notification(&yookassa_notification("payment.canceled", reference(&order)))
        .await
        .unwrap();

    assert_eq!(harness.status_of(&order), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_regional_notification_for_unknown_payment_fails_fetch() {
    let harness = Harness::new();

    let result = harness
        .settlement()
        .regional_notification(&yookassa_notification("payment.succeeded", "forged-id"))
        .await;

    assert!(matches!(result, Err(SettlementError::Payment(_))));
}
