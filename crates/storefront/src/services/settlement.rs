//! Provider-confirmed payment outcomes.
//!
//! Webhooks land here after transport checks (signature, JSON). Stripe events
//! carry the status themselves; YooKassa notifications are only a hint, so the
//! payment is fetched back and the fetched status is applied.

use thiserror::Error;
use tracing::instrument;

use lavka_core::{OrderStatus, PaymentProvider};

use super::OrderStore;
use crate::db::{RepositoryError, StatusUpdate};
use crate::payments::stripe::StripeEvent;
use crate::payments::yookassa::Notification;
use crate::payments::{PaymentError, RegionalGateway};

/// What a provider notification did.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// The notification does not settle a payment.
    Ignored,
    /// No order carries the provider reference.
    UnknownReference,
    /// The order the reference points at, after the store's decision.
    Updated(StatusUpdate),
}

/// Errors from [`SettlementService`].
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("could not fetch payment: {0}")]
    Payment(#[from] PaymentError),
}

/// Applies webhook outcomes to orders.
pub struct SettlementService<'a, S, R> {
    store: &'a S,
    regional: &'a R,
}

impl<'a, S, R> SettlementService<'a, S, R>
where
    S: OrderStore,
    R: RegionalGateway,
{
    #[must_use]
    pub const fn new(store: &'a S, regional: &'a R) -> Self {
        Self { store, regional }
    }

    /// Apply a verified Stripe event.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::Repository`] if the store fails.
    #[instrument(skip_all, fields(event_id = %event.id, kind = %event.kind))]
    pub async fn stripe_event(&self, event: &StripeEvent) -> Result<Settlement, SettlementError> {
        let Some((session_id, status)) = event.order_status() else {
            tracing::debug!("Ignoring Stripe event");
            return Ok(Settlement::Ignored);
        };

        self.apply(PaymentProvider::Stripe, session_id, status).await
    }

    /// Re-read the notified payment and apply its status.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::Payment`] if the payment cannot be fetched
    /// and [`SettlementError::Repository`] if the store fails.
    #[instrument(skip_all, fields(payment_id = %notification.object.id))]
    pub async fn regional_notification(
        &self,
        notification: &Notification,
    ) -> Result<Settlement, SettlementError> {
        let payment = self.regional.get_payment(&notification.object.id).await?;

        let Some(status) = payment.status.order_status() else {
            tracing::debug!(event = %notification.event, "Payment not settled yet");
            return Ok(Settlement::Ignored);
        };

        self.apply(PaymentProvider::Yookassa, &payment.id, status)
            .await
    }

    async fn apply(
        &self,
        provider: PaymentProvider,
        reference: &str,
        status: OrderStatus,
    ) -> Result<Settlement, SettlementError> {
        match self
            .store
            .set_status_by_reference(provider, reference, status)
            .await
        {
            Ok(update) => {
                if let StatusUpdate::Applied(order) = &update {
                    tracing::info!(order_id = %order.id, %provider, status = %order.status, "Webhook applied");
                }
                Ok(Settlement::Updated(update))
            }
            Err(RepositoryError::NotFound) => {
                tracing::warn!(%provider, reference, "Webhook for unknown payment");
                Ok(Settlement::UnknownReference)
            }
            Err(e) => Err(e.into()),
        }
    }
}
