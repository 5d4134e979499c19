//! YooKassa payments client.
//!
//! Payments are created with `POST /v3/payments` under HTTP Basic auth
//! (`shop_id:secret_key`). Every create carries an `Idempotence-Key` header;
//! YooKassa returns the original payment for a repeated key instead of
//! charging twice.
//!
//! Notifications are not signed, so the webhook handler only trusts the
//! payment id from the body and re-reads the payment with
//! [`YooKassaClient::fetch_payment`].

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use lavka_core::IdempotencyKey;

use super::{
    PaymentError, REQUEST_TIMEOUT, RegionalGateway, RegionalPayment, RegionalPaymentRequest,
    RegionalPaymentStatus,
};
use crate::config::YooKassaConfig;

/// Description shown to the buyer on the YooKassa page.
pub const DEFAULT_DESCRIPTION: &str = "Товары в корзине";

/// YooKassa API client.
#[derive(Clone)]
pub struct YooKassaClient {
    client: Client,
    shop_id: String,
    secret_key: SecretString,
    api_base: String,
}

impl std::fmt::Debug for YooKassaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YooKassaClient")
            .field("shop_id", &self.shop_id)
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CreatePaymentBody<'a> {
    amount: AmountBody<'a>,
    confirmation: ConfirmationBody<'a>,
    capture: bool,
    test: bool,
    description: &'a str,
    metadata: MetadataBody,
}

#[derive(Debug, Serialize)]
struct AmountBody<'a> {
    value: String,
    currency: &'a str,
}

#[derive(Debug, Serialize)]
struct ConfirmationBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    return_url: &'a str,
}

#[derive(Debug, Serialize)]
struct MetadataBody {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: String,
    status: RegionalPaymentStatus,
    #[serde(default)]
    confirmation: Option<ConfirmationResponse>,
}

#[derive(Debug, Deserialize)]
struct ConfirmationResponse {
    #[serde(default)]
    confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

impl From<PaymentResponse> for RegionalPayment {
    fn from(response: PaymentResponse) -> Self {
        Self {
            id: response.id,
            status: response.status,
            confirmation_url: response.confirmation.and_then(|c| c.confirmation_url),
        }
    }
}

/// Body of an HTTP notification.
#[derive(Debug, Deserialize)]
pub struct Notification {
    pub event: String,
    pub object: NotificationObject,
}

/// The payment a notification refers to.
#[derive(Debug, Deserialize)]
pub struct NotificationObject {
    pub id: String,
}

impl YooKassaClient {
    /// Create a new YooKassa client.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Network` if the HTTP client fails to build.
    pub fn new(config: &YooKassaConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Network(e.to_string()))?;

        Ok(Self {
            client,
            shop_id: config.shop_id.clone(),
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.clone(),
        })
    }

    /// Create a redirect payment.
    ///
    /// # Errors
    ///
    /// Returns a [`PaymentError`] classified from the HTTP status, or
    /// `PaymentError::Parse` if the payment has no confirmation URL.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = %request.amount))]
    pub async fn create(
        &self,
        request: &RegionalPaymentRequest,
        idempotency_key: IdempotencyKey,
    ) -> Result<RegionalPayment, PaymentError> {
        let url = format!("{}/v3/payments", self.api_base);
        let body = CreatePaymentBody {
            amount: AmountBody {
                value: request.amount.value_string(),
                currency: request.amount.currency.code(),
            },
            confirmation: ConfirmationBody {
                kind: "redirect",
                return_url: &request.return_url,
            },
            capture: request.capture,
            test: request.test,
            description: &request.description,
            metadata: MetadataBody {
                order_id: request.order_id.to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.shop_id, Some(self.secret_key.expose_secret()))
            .header("Idempotence-Key", idempotency_key.to_string())
            .json(&body)
            .send()
            .await?;

        let payment = Self::read_payment(response).await?;
        if payment.confirmation_url.is_none() {
            return Err(PaymentError::Parse(format!(
                "payment {} has no confirmation url",
                payment.id
            )));
        }

        debug!(payment_id = %payment.id, "YooKassa payment created");
        Ok(payment)
    }

    /// Fetch a payment by id.
    ///
    /// # Errors
    ///
    /// Returns a [`PaymentError`] classified from the HTTP status.
    #[instrument(skip(self))]
    pub async fn fetch_payment(&self, payment_id: &str) -> Result<RegionalPayment, PaymentError> {
        if payment_id.is_empty() || !payment_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(PaymentError::InvalidRequest(format!(
                "malformed payment id: {payment_id}"
            )));
        }

        let url = format!("{}/v3/payments/{payment_id}", self.api_base);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.shop_id, Some(self.secret_key.expose_secret()))
            .send()
            .await?;

        Self::read_payment(response).await
    }

    async fn read_payment(response: reqwest::Response) -> Result<RegionalPayment, PaymentError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map_or(body, |e| format!("{}: {}", e.code, e.description));
            return Err(PaymentError::from_status(status.as_u16(), message));
        }

        let payment: PaymentResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;
        Ok(payment.into())
    }
}

impl RegionalGateway for YooKassaClient {
    async fn create_payment(
        &self,
        request: &RegionalPaymentRequest,
        idempotency_key: IdempotencyKey,
    ) -> Result<RegionalPayment, PaymentError> {
        self.create(request, idempotency_key).await
    }

    async fn get_payment(&self, payment_id: &str) -> Result<RegionalPayment, PaymentError> {
        self.fetch_payment(payment_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::SocketAddr;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router, extract::Path, extract::State};
    use lavka_core::{Currency, Money, OrderId};
    use rust_decimal::Decimal;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured {
        creates: Arc<Mutex<Vec<(HeaderMap, serde_json::Value)>>>,
    }

    async fn start_mock_yookassa(create_status: StatusCode) -> (SocketAddr, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/v3/payments",
                post(
                    move |State(captured): State<Captured>,
                          headers: HeaderMap,
                          Json(body): Json<serde_json::Value>| async move {
                        captured.creates.lock().unwrap().push((headers, body));
                        if create_status.is_success() {
                            (
                                create_status,
                                Json(serde_json::json!({
                                    "id": "2d8a9c3b-000f-5000-9000-1b2c3d4e5f60",
                                    "status": "pending",
                                    "confirmation": {
                                        "type": "redirect",
                                        "confirmation_url": "https://yoomoney.ru/checkout/payments/v2/contract?orderId=2d8a9c3b"
                                    }
                                })),
                            )
                        } else {
                            (
                                create_status,
                                Json(serde_json::json!({
                                    "type": "error",
                                    "code": "invalid_credentials",
                                    "description": "Authentication error"
                                })),
                            )
                        }
                    },
                ),
            )
            .route(
                "/v3/payments/{id}",
                get(|Path(id): Path<String>| async move {
                    Json(serde_json::json!({ "id": id, "status": "succeeded" }))
                }),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, captured)
    }

    fn client_for(addr: SocketAddr) -> YooKassaClient {
        YooKassaClient::new(&YooKassaConfig {
            shop_id: "506751".to_string(),
            secret_key: SecretString::from("test_Fh8hUAVVBGUGbjmlzba6TB0iyUbos"),
            api_base: format!("http://{addr}"),
            conversion_rate: Decimal::from(93),
            test_mode: true,
        })
        .unwrap()
    }

    fn request() -> RegionalPaymentRequest {
        RegionalPaymentRequest {
            order_id: OrderId::new(7),
            amount: Money::new(Decimal::from_str("1906.50").unwrap(), Currency::Rub),
            return_url: "https://shop.test/payment/payment-success".to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            capture: true,
            test: true,
        }
    }

    #[tokio::test]
    async fn test_create_sends_rub_amount_and_idempotence_key() {
        let (addr, captured) = start_mock_yookassa(StatusCode::OK).await;
        let key = IdempotencyKey::generate();

        let payment = client_for(addr).create(&request(), key).await.unwrap();
        assert_eq!(payment.status, RegionalPaymentStatus::Pending);
        assert!(payment.confirmation_url.unwrap().starts_with("https://yoomoney.ru/"));

        let creates = captured.creates.lock().unwrap();
        let (headers, body) = &creates[0];
        assert_eq!(headers["idempotence-key"], key.to_string().as_str());
        assert!(
            headers["authorization"]
                .to_str()
                .unwrap()
                .starts_with("Basic ")
        );
        assert_eq!(body["amount"]["value"], "1906.50");
        assert_eq!(body["amount"]["currency"], "RUB");
        assert_eq!(body["confirmation"]["type"], "redirect");
        assert_eq!(body["capture"], true);
        assert_eq!(body["test"], true);
        assert_eq!(body["description"], DEFAULT_DESCRIPTION);
        assert_eq!(body["metadata"]["order_id"], "7");
    }

    #[tokio::test]
    async fn test_create_maps_auth_failure() {
        let (addr, _) = start_mock_yookassa(StatusCode::UNAUTHORIZED).await;
        let err = client_for(addr)
            .create(&request(), IdempotencyKey::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Unauthorized));
    }

    #[tokio::test]
    async fn test_fetch_payment() {
        let (addr, _) = start_mock_yookassa(StatusCode::OK).await;
        let payment = client_for(addr)
            .fetch_payment("2d8a9c3b-000f-5000-9000-1b2c3d4e5f60")
            .await
            .unwrap();
        assert_eq!(payment.status, RegionalPaymentStatus::Succeeded);
        assert_eq!(payment.status.order_status(), Some(lavka_core::OrderStatus::Paid));
    }

    #[tokio::test]
    async fn test_fetch_rejects_path_injection() {
        let client = client_for("127.0.0.1:9".parse().unwrap());
        let err = client.fetch_payment("../me").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest(_)));
    }

    #[test]
    fn test_notification_parsing() {
        let notification: Notification = serde_json::from_str(
            r#"{"type":"notification","event":"payment.succeeded",
                "object":{"id":"2d8a9c3b","status":"succeeded","paid":true}}"#,
        )
        .unwrap();
        assert_eq!(notification.event, "payment.succeeded");
        assert_eq!(notification.object.id, "2d8a9c3b");
    }
}
