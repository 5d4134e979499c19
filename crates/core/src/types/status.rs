//! Status enums for orders and payments.

use serde::{Deserialize, Serialize};

/// Lifecycle of an order created at checkout.
///
/// ```text
/// pending -> awaiting_payment -> paid
///    |         ^       |
///    v         |       v
///  failed -----+   cancelled
/// ```
///
/// A failed order may be retried with the same idempotency key, which moves it
/// back to `awaiting_payment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Rows written, provider not contacted yet.
    #[default]
    Pending,
    /// Provider accepted the request; the buyer is on its confirmation page.
    AwaitingPayment,
    /// Provider confirmed the payment server-to-server.
    Paid,
    /// The provider request failed.
    Failed,
    /// The buyer abandoned or the provider cancelled the payment.
    Cancelled,
}

impl OrderStatus {
    /// Whether a webhook may still move this order to `to`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::AwaitingPayment | Self::Failed)
                | (Self::Failed, Self::AwaitingPayment)
                | (Self::AwaitingPayment, Self::Paid | Self::Cancelled)
        )
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// External payment provider selected at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.payment_provider", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    /// Card-network hosted checkout.
    Stripe,
    /// Regional gateway with redirect confirmation.
    Yookassa,
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stripe => write!(f, "stripe"),
            Self::Yookassa => write!(f, "yookassa"),
        }
    }
}

impl std::str::FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(Self::Stripe),
            "yookassa" => Ok(Self::Yookassa),
            _ => Err(format!("invalid payment provider: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::AwaitingPayment));
        assert!(OrderStatus::AwaitingPayment.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::AwaitingPayment.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [OrderStatus::Paid, OrderStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(OrderStatus::AwaitingPayment));
            assert!(!terminal.can_transition_to(OrderStatus::Paid));
        }
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn test_failed_order_can_be_retried() {
        assert!(!OrderStatus::Failed.is_terminal());
        assert!(OrderStatus::Failed.can_transition_to(OrderStatus::AwaitingPayment));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn test_provider_round_trips_through_str() {
        for provider in [PaymentProvider::Stripe, PaymentProvider::Yookassa] {
            assert_eq!(provider.to_string().parse::<PaymentProvider>(), Ok(provider));
        }
        assert!("paypal".parse::<PaymentProvider>().is_err());
    }
}
