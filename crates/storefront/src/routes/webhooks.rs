//! Payment provider webhooks.
//!
//! Providers report settled payments here. Stripe signs its payloads;
//! YooKassa notifications are unsigned, so the payment is fetched back from
//! the API and only that answer is trusted.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::payments::stripe::{StripeEvent, verify_webhook_signature};
use crate::payments::yookassa::Notification;
use crate::services::SettlementService;
use crate::state::AppState;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe webhook: verify the signature, then settle the checkout session.
///
/// Unknown sessions and unhandled events are acknowledged so Stripe stops
/// retrying.
#[instrument(skip_all)]
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("missing Stripe-Signature header".to_string()))?;

    verify_webhook_signature(
        &body,
        signature,
        &state.config().stripe.webhook_secret,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Rejected Stripe webhook");
        AppError::Unauthorized(e.to_string())
    })?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid event: {e}")))?;

    SettlementService::new(state.store(), state.yookassa())
        .stripe_event(&event)
        .await?;
    Ok(StatusCode::OK)
}

/// YooKassa webhook: re-read the payment and apply its status.
#[instrument(skip_all)]
pub async fn yookassa(
    State(state): State<AppState>,
    Json(notification): Json<Notification>,
) -> Result<StatusCode> {
    SettlementService::new(state.store(), state.yookassa())
        .regional_notification(&notification)
        .await?;
    Ok(StatusCode::OK)
}
