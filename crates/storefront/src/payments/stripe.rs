//! Stripe Checkout client and webhook verification.
//!
//! Sessions are created with a form-encoded `POST /v1/checkout/sessions`.
//! Nested parameters use Stripe's bracket syntax
//! (`line_items[0][price_data][unit_amount]`).

use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, instrument};

use lavka_core::{IdempotencyKey, OrderStatus};

use super::{CardCheckoutRequest, CardGateway, HostedCheckout, PaymentError, REQUEST_TIMEOUT};
use crate::config::StripeConfig;

/// Maximum age of a signed webhook, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Stripe API client for hosted checkout sessions.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_version: String,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("secret_key", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Network` if the HTTP client fails to build.
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Network(e.to_string()))?;

        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            api_version: config.api_version.clone(),
            api_base: config.api_base.clone(),
        })
    }

    /// Create a Checkout session holding every line item of the request.
    ///
    /// # Errors
    ///
    /// Returns a [`PaymentError`] classified from the HTTP status and Stripe's
    /// error `type`.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, items = request.line_items.len()))]
    pub async fn create_session(
        &self,
        request: &CardCheckoutRequest,
        idempotency_key: IdempotencyKey,
    ) -> Result<HostedCheckout, PaymentError> {
        let url = format!("{}/v1/checkout/sessions", self.api_base);
        let params = session_params(request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.secret_key.expose_secret())
            .header("Stripe-Version", &self.api_version)
            .header("Idempotency-Key", idempotency_key.to_string())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::Parse("checkout session has no url".to_string()))?;

        debug!(session_id = %session.id, "Stripe checkout session created");
        Ok(HostedCheckout {
            id: session.id,
            url,
        })
    }
}

impl CardGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CardCheckoutRequest,
        idempotency_key: IdempotencyKey,
    ) -> Result<HostedCheckout, PaymentError> {
        self.create_session(request, idempotency_key).await
    }
}

/// Flatten a checkout request into Stripe's bracketed form parameters.
fn session_params(request: &CardCheckoutRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        (
            "client_reference_id".to_string(),
            request.order_id.to_string(),
        ),
        ("metadata[order_id]".to_string(), request.order_id.to_string()),
    ];

    if let Some(email) = &request.customer_email {
        params.push(("customer_email".to_string(), email.clone()));
    }

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        params.extend([
            (
                format!("{prefix}[price_data][currency]"),
                item.currency.to_string(),
            ),
            (
                format!("{prefix}[price_data][unit_amount]"),
                item.unit_amount.to_string(),
            ),
            (
                format!("{prefix}[price_data][product_data][name]"),
                item.name.clone(),
            ),
            (format!("{prefix}[quantity]"), item.quantity.to_string()),
        ]);
    }

    params
}

fn classify_error(status: u16, body: &str) -> PaymentError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if envelope.error.kind == "card_error" => {
            PaymentError::Declined(envelope.error.message)
        }
        Ok(envelope) => PaymentError::from_status(status, envelope.error.message),
        Err(_) => PaymentError::from_status(status, body.to_string()),
    }
}

// =============================================================================
// Webhooks
// =============================================================================

/// Reasons a webhook signature is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed Stripe-Signature header")]
    MalformedHeader,

    #[error("webhook timestamp outside tolerance")]
    Expired,

    #[error("no matching v1 signature")]
    Mismatch,
}

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// The header looks like `t=1700000000,v1=<hex>[,v1=<hex>]`. Any `v1` entry
/// matching HMAC-SHA256 of `"{t}.{payload}"` accepts the payload, provided
/// `t` is within [`WEBHOOK_TOLERANCE_SECS`] of `now`.
///
/// # Errors
///
/// Returns the first [`SignatureError`] found.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &SecretString,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }
    if (now - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    let mut signed = timestamp.to_string().into_bytes();
    signed.push(b'.');
    signed.extend_from_slice(payload);

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        else {
            return Err(SignatureError::MalformedHeader);
        };
        mac.update(&signed);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(SignatureError::Mismatch)
}

/// A webhook event. Only the fields checkout needs are decoded.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: CheckoutSessionObject,
}

/// The Checkout Session carried by `checkout.session.*` events.
#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
}

impl StripeEvent {
    /// Order status implied by this event, with the session it refers to.
    ///
    /// Events that do not settle an order return `None`.
    #[must_use]
    pub fn order_status(&self) -> Option<(&str, OrderStatus)> {
        let session = &self.data.object;
        let status = match self.kind.as_str() {
            "checkout.session.completed" if session.payment_status.as_deref() == Some("paid") => {
                OrderStatus::Paid
            }
            "checkout.session.async_payment_succeeded" => OrderStatus::Paid,
            "checkout.session.expired" => OrderStatus::Cancelled,
            _ => return None,
        };
        Some((session.id.as_str(), status))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::http::{HeaderMap, StatusCode};
    use axum::{Router, extract::State, routing::post};
    use lavka_core::{Currency, OrderId};

    use super::*;
    use crate::payments::CardLineItem;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &str, timestamp: i64) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn request(items: usize) -> CardCheckoutRequest {
        CardCheckoutRequest {
            order_id: OrderId::new(42),
            line_items: (0..items)
                .map(|i| CardLineItem {
                    name: format!("Tea {i}"),
                    unit_amount: 450,
                    currency: Currency::Usd.lowercase_code(),
                    quantity: 2,
                })
                .collect(),
            success_url: "https://shop.test/payment/payment-success".to_string(),
            cancel_url: "https://shop.test/payment/payment-failed".to_string(),
            customer_email: None,
        }
    }

    #[derive(Clone, Default)]
    struct Captured {
        calls: Arc<Mutex<Vec<(HeaderMap, String)>>>,
    }

    async fn start_mock_stripe(status: StatusCode, body: &'static str) -> (SocketAddr, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/v1/checkout/sessions",
                post(
                    move |State(captured): State<Captured>, headers: HeaderMap, body_in: String| async move {
                        captured.calls.lock().unwrap().push((headers, body_in));
                        (status, body)
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, captured)
    }

    fn client_for(addr: SocketAddr) -> StripeClient {
        StripeClient::new(&StripeConfig {
            secret_key: SecretString::from("sk_test_4eC39HqLyjWDarjtT1zdp7dc"),
            publishable_key: "pk_test".to_string(),
            api_version: "2024-06-20".to_string(),
            webhook_secret: SecretString::from(SECRET),
            api_base: format!("http://{addr}"),
            currency: Currency::Usd,
        })
        .unwrap()
    }

    #[test]
    fn test_session_params_flatten_every_line() {
        let params = session_params(&request(3));
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(get("client_reference_id"), Some("42"));
        assert_eq!(get("line_items[2][price_data][unit_amount]"), Some("450"));
        assert_eq!(get("line_items[2][price_data][currency]"), Some("usd"));
        assert_eq!(get("line_items[0][price_data][product_data][name]"), Some("Tea 0"));
        assert_eq!(get("line_items[1][quantity]"), Some("2"));
        assert_eq!(get("line_items[3][quantity]"), None);
    }

    #[tokio::test]
    async fn test_create_session_sends_one_request() {
        let (addr, captured) = start_mock_stripe(
            StatusCode::OK,
            r#"{"id":"cs_test_1","url":"https://checkout.stripe.com/c/pay/cs_test_1"}"#,
        )
        .await;
        let key = IdempotencyKey::generate();

        let session = client_for(addr)
            .create_session(&request(2), key)
            .await
            .unwrap();
        assert_eq!(session.id, "cs_test_1");

        let calls = captured.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (headers, body) = &calls[0];
        assert_eq!(headers["stripe-version"], "2024-06-20");
        assert_eq!(headers["idempotency-key"], key.to_string().as_str());
        assert!(
            headers["authorization"]
                .to_str()
                .unwrap()
                .starts_with("Bearer sk_test_")
        );

        let form: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        let line_quantities = form
            .iter()
            .filter(|(k, _)| k.ends_with("[quantity]"))
            .count();
        assert_eq!(line_quantities, 2);
    }

    #[tokio::test]
    async fn test_card_error_maps_to_declined() {
        let (addr, _) = start_mock_stripe(
            StatusCode::PAYMENT_REQUIRED,
            r#"{"error":{"type":"card_error","message":"Your card was declined."}}"#,
        )
        .await;

        let err = client_for(addr)
            .create_session(&request(1), IdempotencyKey::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Declined(ref m) if m == "Your card was declined."));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_provider() {
        let (addr, _) = start_mock_stripe(StatusCode::SERVICE_UNAVAILABLE, "upstream down").await;

        let err = client_for(addr)
            .create_session(&request(1), IdempotencyKey::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Provider { status: 503, .. }));
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, 1_700_000_000);
        let secret = SecretString::from(SECRET);
        assert_eq!(
            verify_webhook_signature(payload.as_bytes(), &header, &secret, 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_and_expired_signatures_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, 1_700_000_000);
        let secret = SecretString::from(SECRET);

        assert_eq!(
            verify_webhook_signature(br#"{"id":"evt_2"}"#, &header, &secret, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_webhook_signature(payload.as_bytes(), &header, &secret, 1_700_000_301),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            verify_webhook_signature(payload.as_bytes(), "v1=abc", &secret, 1_700_000_000),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn test_event_status_mapping() {
        let completed: StripeEvent = serde_json::from_str(
            r#"{"id":"evt_1","type":"checkout.session.completed",
                "data":{"object":{"id":"cs_1","payment_status":"paid"}}}"#,
        )
        .unwrap();
        assert_eq!(completed.order_status(), Some(("cs_1", OrderStatus::Paid)));

        let unpaid: StripeEvent = serde_json::from_str(
            r#"{"id":"evt_2","type":"checkout.session.completed",
                "data":{"object":{"id":"cs_2","payment_status":"unpaid"}}}"#,
        )
        .unwrap();
        assert_eq!(unpaid.order_status(), None);

        let expired: StripeEvent = serde_json::from_str(
            r#"{"id":"evt_3","type":"checkout.session.expired","data":{"object":{"id":"cs_3"}}}"#,
        )
        .unwrap();
        assert_eq!(expired.order_status(), Some(("cs_3", OrderStatus::Cancelled)));
    }
}
