//! External payment providers.
//!
//! Two gateways are supported:
//!
//! - [`stripe`]: card-network hosted checkout. One session carries every cart
//!   line; the browser is sent to the session URL.
//! - [`yookassa`]: regional gateway. One payment carries the converted order
//!   total; the browser is sent to the confirmation URL.
//!
//! The checkout service talks to them through [`CardGateway`] and
//! [`RegionalGateway`] so it can run against in-memory fakes in tests.

pub mod stripe;
pub mod yookassa;

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use lavka_core::{IdempotencyKey, Money, OrderId, OrderStatus, PaymentProvider};

pub use stripe::StripeClient;
pub use yookassa::YooKassaClient;

/// Timeout applied to every provider request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by payment providers.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The provider refused the payment (card declined, insufficient funds).
    #[error("payment declined: {0}")]
    Declined(String),

    /// The provider did not answer in time.
    #[error("payment provider timed out")]
    Timeout,

    /// The request never reached the provider.
    #[error("network error: {0}")]
    Network(String),

    /// The provider rejected the request as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider rejected our credentials.
    #[error("payment provider rejected credentials")]
    Unauthorized,

    /// The provider throttled us.
    #[error("payment provider rate limit exceeded")]
    RateLimited,

    /// Any other non-success answer.
    #[error("payment provider error: {status} - {message}")]
    Provider { status: u16, message: String },

    /// The provider answered with something we could not interpret.
    #[error("unexpected provider response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl PaymentError {
    /// Map a non-success status with a provider message.
    ///
    /// Provider-specific codes (Stripe's `card_error`, for instance) are
    /// handled by the caller before falling back to this.
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 | 404 | 409 | 422 => Self::InvalidRequest(message),
            401 | 403 => Self::Unauthorized,
            402 => Self::Declined(message),
            429 => Self::RateLimited,
            _ => Self::Provider { status, message },
        }
    }
}

/// Checkout method selected on the completion form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentMethod {
    /// Card network via hosted checkout.
    Card,
    /// Regional gateway with redirect confirmation.
    #[default]
    Regional,
}

impl PaymentMethod {
    /// Form tag that selects the card gateway.
    pub const CARD_TAG: &'static str = "stripe-payment";
    /// Form tag that selects the regional gateway.
    pub const REGIONAL_TAG: &'static str = "yookassa-payment";

    /// Resolve the posted tag. Anything other than the card tag, including a
    /// missing one, selects the regional gateway.
    #[must_use]
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            Some(Self::CARD_TAG) => Self::Card,
            _ => Self::Regional,
        }
    }

    /// Provider that serves this method.
    #[must_use]
    pub const fn provider(self) -> PaymentProvider {
        match self {
            Self::Card => PaymentProvider::Stripe,
            Self::Regional => PaymentProvider::Yookassa,
        }
    }
}

/// One line item of a hosted card checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardLineItem {
    pub name: String,
    /// Unit price in minor units (cents).
    pub unit_amount: i64,
    /// Lowercase ISO code, e.g. `usd`.
    pub currency: &'static str,
    pub quantity: u32,
}

/// Everything needed to open one hosted card checkout.
#[derive(Debug, Clone)]
pub struct CardCheckoutRequest {
    pub order_id: OrderId,
    pub line_items: Vec<CardLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
}

/// A created hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostedCheckout {
    pub id: String,
    pub url: String,
}

/// Everything needed to create one regional payment.
#[derive(Debug, Clone)]
pub struct RegionalPaymentRequest {
    pub order_id: OrderId,
    /// Converted total in the regional currency.
    pub amount: Money,
    pub return_url: String,
    pub description: String,
    pub capture: bool,
    pub test: bool,
}

/// Status of a regional payment as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionalPaymentStatus {
    Pending,
    WaitingForCapture,
    Succeeded,
    Canceled,
}

impl RegionalPaymentStatus {
    /// Order status a settled payment implies. Unsettled payments give `None`.
    #[must_use]
    pub const fn order_status(self) -> Option<OrderStatus> {
        match self {
            Self::Succeeded => Some(OrderStatus::Paid),
            Self::Canceled => Some(OrderStatus::Cancelled),
            Self::Pending | Self::WaitingForCapture => None,
        }
    }
}

/// A created or fetched regional payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionalPayment {
    pub id: String,
    pub status: RegionalPaymentStatus,
    /// Present on freshly created redirect payments.
    pub confirmation_url: Option<String>,
}

/// Card-network hosted checkout.
pub trait CardGateway: Send + Sync {
    /// Open a hosted checkout session for all line items.
    fn create_checkout_session(
        &self,
        request: &CardCheckoutRequest,
        idempotency_key: IdempotencyKey,
    ) -> impl Future<Output = Result<HostedCheckout, PaymentError>> + Send;
}

/// Regional gateway with redirect confirmation.
pub trait RegionalGateway: Send + Sync {
    /// Create a payment. The provider deduplicates on `idempotency_key`.
    fn create_payment(
        &self,
        request: &RegionalPaymentRequest,
        idempotency_key: IdempotencyKey,
    ) -> impl Future<Output = Result<RegionalPayment, PaymentError>> + Send;

    /// Fetch the current state of a payment.
    fn get_payment(
        &self,
        payment_id: &str,
    ) -> impl Future<Output = Result<RegionalPayment, PaymentError>> + Send;
}
