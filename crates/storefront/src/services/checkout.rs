//! Checkout orchestration.
//!
//! Turns the session cart into a durable order and a provider redirect:
//!
//! 1. Reuse the order already created for this idempotency key, if any.
//! 2. Resolve the shipping address (get-or-create for users, fresh row for
//!    guests).
//! 3. Write the order and its items in one transaction.
//! 4. Ask the selected provider for a payment page and record its answer.
//!
//! Persistence and both providers sit behind traits so the whole flow runs
//! against fakes in tests.

use std::future::Future;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::instrument;

use lavka_core::{
    Currency, IdempotencyKey, MoneyError, OrderId, OrderStatus, PaymentProvider, UserId,
};

use crate::db::{RepositoryError, StatusUpdate};
use crate::models::{
    Cart, Order, OrderDraft, OrderDraftError, OrderItem, ShippingAddress, ShippingDetails,
};
use crate::payments::{
    CardCheckoutRequest, CardGateway, CardLineItem, PaymentError, PaymentMethod,
    RegionalGateway, RegionalPaymentRequest,
};

/// Persistence needed by checkout.
pub trait OrderStore: Send + Sync {
    /// The user's address, created from `details` if they have none.
    fn shipping_for_user(
        &self,
        user_id: UserId,
        details: &ShippingDetails,
    ) -> impl Future<Output = Result<ShippingAddress, RepositoryError>> + Send;

    /// A new ownerless address for a guest checkout.
    fn create_guest_shipping(
        &self,
        details: &ShippingDetails,
    ) -> impl Future<Output = Result<ShippingAddress, RepositoryError>> + Send;

    fn find_order_by_idempotency_key(
        &self,
        key: IdempotencyKey,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Write the order and its items atomically.
    ///
    /// A taken idempotency key yields `RepositoryError::Conflict`.
    fn create_order(
        &self,
        draft: &OrderDraft,
    ) -> impl Future<Output = Result<(Order, Vec<OrderItem>), RepositoryError>> + Send;

    fn order_items(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Vec<OrderItem>, RepositoryError>> + Send;

    /// Attach the provider reference and move the order to `awaiting_payment`.
    fn record_payment(
        &self,
        order_id: OrderId,
        provider: PaymentProvider,
        reference: &str,
        confirmation_url: &str,
    ) -> impl Future<Output = Result<Order, RepositoryError>> + Send;

    fn mark_failed(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Order, RepositoryError>> + Send;

    /// Apply a provider-confirmed status to the order holding `reference`.
    ///
    /// An unknown reference yields `RepositoryError::NotFound`.
    fn set_status_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
        status: OrderStatus,
    ) -> impl Future<Output = Result<StatusUpdate, RepositoryError>> + Send;
}

/// Errors from [`CheckoutService::complete`].
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("cart cannot be checked out: {0}")]
    InvalidCart(#[from] OrderDraftError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The provider refused or failed; the order has been marked failed.
    #[error("payment for order {order_id} failed: {source}")]
    Payment {
        order_id: OrderId,
        #[source]
        source: PaymentError,
    },

    /// The idempotency key belongs to an order that can no longer be paid.
    #[error("order {0} is already settled")]
    StaleSubmission(OrderId),

    /// The idempotency key belongs to an order for a different cart or
    /// payment method.
    #[error("order {0} was created for a different submission")]
    SubmissionChanged(OrderId),
}

impl From<MoneyError> for CheckoutError {
    fn from(err: MoneyError) -> Self {
        Self::InvalidCart(OrderDraftError::Money(err))
    }
}

/// Static inputs for provider requests.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Absolute URL of the payment success page.
    pub success_url: String,
    /// Absolute URL of the payment failure page.
    pub cancel_url: String,
    /// Currency charged on the card gateway.
    pub card_currency: Currency,
    /// Multiplier from the order currency to roubles.
    pub conversion_rate: Decimal,
    /// Whether regional payments are flagged as test payments.
    pub test_mode: bool,
    /// Description shown on the regional payment page.
    pub description: String,
}

/// One checkout submission.
#[derive(Debug)]
pub struct CheckoutRequest<'c> {
    /// Logged-in user, `None` for guests.
    pub user: Option<UserId>,
    pub shipping: ShippingDetails,
    pub method: PaymentMethod,
    pub cart: &'c Cart,
    pub idempotency_key: IdempotencyKey,
}

/// Where to send the browser next.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: Order,
    pub redirect_url: String,
    /// Whether an order from an earlier submission with the same key was used.
    pub reused: bool,
}

/// Checkout orchestrator.
pub struct CheckoutService<'a, S, C, R> {
    store: &'a S,
    card: &'a C,
    regional: &'a R,
    settings: &'a CheckoutSettings,
}

impl<'a, S, C, R> CheckoutService<'a, S, C, R>
where
    S: OrderStore,
    C: CardGateway,
    R: RegionalGateway,
{
    /// Create a checkout service over the given store and gateways.
    #[must_use]
    pub const fn new(
        store: &'a S,
        card: &'a C,
        regional: &'a R,
        settings: &'a CheckoutSettings,
    ) -> Self {
        Self {
            store,
            card,
            regional,
            settings,
        }
    }

    /// Complete a checkout submission.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::EmptyCart`] for an empty cart,
    /// [`CheckoutError::Payment`] when the provider fails (after marking the
    /// order failed), [`CheckoutError::StaleSubmission`] when the key belongs
    /// to a settled order, [`CheckoutError::SubmissionChanged`] when it belongs
    /// to an order for another cart or method, and repository errors as they
    /// occur.
    #[instrument(
        skip(self, request),
        fields(
            key = %request.idempotency_key,
            method = ?request.method,
            guest = request.user.is_none(),
        )
    )]
    pub async fn complete(
        &self,
        request: CheckoutRequest<'_>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if request.cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let key = request.idempotency_key;
        if let Some(existing) = self.store.find_order_by_idempotency_key(key).await? {
            return self.resume(existing, &request).await;
        }

        let shipping = match request.user {
            Some(user_id) => {
                self.store
                    .shipping_for_user(user_id, &request.shipping)
                    .await?
            }
            None => self.store.create_guest_shipping(&request.shipping).await?,
        };

        let draft = OrderDraft::from_cart(request.cart, request.user, shipping.id, key)?;
        let (order, items) = match self.store.create_order(&draft).await {
            Ok(created) => created,
            Err(RepositoryError::Conflict(_)) => {
                // A concurrent submission with the same key won the insert.
                let existing = self
                    .store
                    .find_order_by_idempotency_key(key)
                    .await?
                    .ok_or(RepositoryError::NotFound)?;
                return self.resume(existing, &request).await;
            }
            Err(e) => return Err(e.into()),
        };

        let (order, redirect_url) = self.pay(order, &items, &request).await?;
        Ok(CheckoutOutcome {
            order,
            redirect_url,
            reused: false,
        })
    }

    /// Continue with an order created by an earlier submission of the same key.
    async fn resume(
        &self,
        existing: Order,
        request: &CheckoutRequest<'_>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if existing.status.is_terminal() {
            return Err(CheckoutError::StaleSubmission(existing.id));
        }

        let items = self.store.order_items(existing.id).await?;
        if !matches_submission(&existing, &items, request) {
            tracing::info!(order_id = %existing.id, "Checkout key reused for a different submission");
            return Err(CheckoutError::SubmissionChanged(existing.id));
        }

        if let Some(url) = existing.resumable_url() {
            tracing::info!(order_id = %existing.id, "Reusing confirmation for resubmitted checkout");
            return Ok(CheckoutOutcome {
                redirect_url: url.to_owned(),
                order: existing,
                reused: true,
            });
        }

        match existing.status {
            OrderStatus::Pending | OrderStatus::Failed => {
                let (order, redirect_url) = self.pay(existing, &items, request).await?;
                Ok(CheckoutOutcome {
                    order,
                    redirect_url,
                    reused: true,
                })
            }
            _ => Err(CheckoutError::StaleSubmission(existing.id)),
        }
    }

    /// Call the selected provider for `order` and record the outcome.
    async fn pay(
        &self,
        order: Order,
        items: &[OrderItem],
        request: &CheckoutRequest<'_>,
    ) -> Result<(Order, String), CheckoutError> {
        let attempt = match request.method {
            PaymentMethod::Card => {
                let card_request = self.card_request(&order, items, request)?;
                self.card
                    .create_checkout_session(&card_request, request.idempotency_key)
                    .await
                    .map(|session| (PaymentProvider::Stripe, session.id, session.url))
            }
            PaymentMethod::Regional => {
                let regional_request = self.regional_request(&order)?;
                self.regional
                    .create_payment(&regional_request, request.idempotency_key)
                    .await
                    .and_then(|payment| {
                        let url = payment.confirmation_url.ok_or_else(|| {
                            PaymentError::Parse("payment has no confirmation url".to_string())
                        })?;
                        Ok((PaymentProvider::Yookassa, payment.id, url))
                    })
            }
        };

        let (provider, reference, url) = match attempt {
            Ok(answer) => answer,
            Err(source) => {
                tracing::error!(order_id = %order.id, error = %source, "Payment provider request failed");
                if let Err(e) = self.store.mark_failed(order.id).await {
                    tracing::error!(order_id = %order.id, error = %e, "Failed to mark order failed");
                }
                return Err(CheckoutError::Payment {
                    order_id: order.id,
                    source,
                });
            }
        };

        match self
            .store
            .record_payment(order.id, provider, &reference, &url)
            .await
        {
            Ok(order) => {
                tracing::info!(order_id = %order.id, %provider, %reference, "Payment created");
                Ok((order, url))
            }
            Err(RepositoryError::Conflict(_)) => {
                // A concurrent submission recorded the same provider answer first.
                let current = self
                    .store
                    .find_order_by_idempotency_key(request.idempotency_key)
                    .await?
                    .ok_or(RepositoryError::NotFound)?;
                match current.resumable_url() {
                    Some(existing_url) => {
                        let existing_url = existing_url.to_owned();
                        Ok((current, existing_url))
                    }
                    None => Err(CheckoutError::StaleSubmission(current.id)),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn card_request(
        &self,
        order: &Order,
        items: &[OrderItem],
        request: &CheckoutRequest<'_>,
    ) -> Result<CardCheckoutRequest, CheckoutError> {
        let currency = self.settings.card_currency;
        let line_items = items
            .iter()
            .map(|item| {
                if item.price.currency != currency {
                    return Err(MoneyError::CurrencyMismatch {
                        left: item.price.currency,
                        right: currency,
                    });
                }
                Ok(CardLineItem {
                    name: item.product_name.clone(),
                    unit_amount: item.price.to_minor_units()?,
                    currency: currency.lowercase_code(),
                    quantity: item.quantity,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CardCheckoutRequest {
            order_id: order.id,
            line_items,
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            customer_email: Some(request.shipping.email.to_string()),
        })
    }

    fn regional_request(&self, order: &Order) -> Result<RegionalPaymentRequest, CheckoutError> {
        let amount = order
            .amount
            .convert(self.settings.conversion_rate, Currency::Rub)?;

        Ok(RegionalPaymentRequest {
            order_id: order.id,
            amount,
            return_url: self.settings.success_url.clone(),
            description: self.settings.description.clone(),
            capture: true,
            test: self.settings.test_mode,
        })
    }
}

/// Whether `order` was placed for the same cart lines and payment method.
fn matches_submission(order: &Order, items: &[OrderItem], request: &CheckoutRequest<'_>) -> bool {
    if order
        .payment_provider
        .is_some_and(|provider| provider != request.method.provider())
    {
        return false;
    }
    if request.cart.total_price().ok() != Some(order.amount) {
        return false;
    }

    let lines = request.cart.lines();
    lines.len() == items.len()
        && lines.iter().all(|line| {
            items.iter().any(|item| {
                item.product_id == line.product_id
                    && item.price == line.unit_price
                    && item.quantity == line.quantity
            })
        })
}
