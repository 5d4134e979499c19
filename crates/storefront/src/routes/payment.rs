//! Shipping, checkout and payment result handlers.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use lavka_core::IdempotencyKey;

use super::cart::{CartView, load_cart};
use crate::db::ShippingRepository;
use crate::error::{AppError, Result, add_breadcrumb};
use crate::filters;
use crate::middleware::{OptionalAuth, RequireAuth};
use crate::models::{CurrentUser, FieldErrors, ShippingForm, session_keys};
use crate::payments::PaymentMethod;
use crate::services::{CheckoutError, CheckoutRequest, CheckoutService};
use crate::state::{AppState, FAILURE_PATH};

/// Path of the checkout page.
pub const CHECKOUT_PATH: &str = "/payment/checkout";

/// Path of the cart page.
const CART_PATH: &str = "/cart";

/// Shipping address page template.
#[derive(Template, WebTemplate)]
#[template(path = "payment/shipping.html")]
pub struct ShippingTemplate {
    pub form: ShippingForm,
    pub errors: FieldErrors,
}

/// Checkout page template.
#[derive(Template, WebTemplate)]
#[template(path = "payment/checkout.html")]
pub struct CheckoutTemplate {
    pub form: ShippingForm,
    pub errors: FieldErrors,
    pub cart: CartView,
    pub idempotency_key: String,
    pub publishable_key: String,
    pub card_tag: &'static str,
    pub regional_tag: &'static str,
}

/// Payment success page template.
#[derive(Template, WebTemplate)]
#[template(path = "payment/success.html")]
pub struct PaymentSuccessTemplate;

/// Payment failed page template.
#[derive(Template, WebTemplate)]
#[template(path = "payment/failed.html")]
pub struct PaymentFailedTemplate;

/// Checkout completion form: the shipping fields plus the selected method.
#[derive(Debug, Deserialize)]
pub struct CompleteOrderForm {
    #[serde(flatten)]
    pub shipping: ShippingForm,
    /// Which submit button was pressed.
    #[serde(rename = "stripe-payment")]
    pub payment_tag: Option<String>,
    /// Key echoed by the page; the session copy is authoritative.
    pub idempotency_key: Option<String>,
}

fn blank_form_for(user: &CurrentUser) -> ShippingForm {
    ShippingForm {
        email: user.email.to_string(),
        ..ShippingForm::default()
    }
}

/// Session idempotency key, minted and stored if missing.
async fn checkout_key(session: &Session) -> Result<IdempotencyKey> {
    if let Some(key) = session
        .get::<IdempotencyKey>(session_keys::CHECKOUT_IDEMPOTENCY_KEY)
        .await?
    {
        return Ok(key);
    }

    let key = IdempotencyKey::generate();
    session
        .insert(session_keys::CHECKOUT_IDEMPOTENCY_KEY, key)
        .await?;
    Ok(key)
}

// =============================================================================
// Shipping
// =============================================================================

/// Display the shipping form, prefilled with the saved address.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn shipping_page(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<ShippingTemplate> {
    let form = ShippingRepository::new(state.pool())
        .get_by_user(user.id)
        .await?
        .map_or_else(|| blank_form_for(&user), |address| (&address.details).into());

    Ok(ShippingTemplate {
        form,
        errors: FieldErrors::default(),
    })
}

/// Save the shipping form and continue to checkout.
#[instrument(skip(state, user, form), fields(user_id = %user.id))]
pub async fn save_shipping(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Form(form): Form<ShippingForm>,
) -> Result<Response> {
    let details = match form.validate() {
        Ok(details) => details,
        Err(errors) => {
            tracing::debug!(%errors, "Shipping form rejected");
            return Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                ShippingTemplate { form, errors },
            )
                .into_response());
        }
    };

    ShippingRepository::new(state.pool())
        .upsert_for_user(user.id, &details)
        .await?;

    add_breadcrumb("checkout", "Shipping address saved", None);
    Ok(Redirect::to(CHECKOUT_PATH).into_response())
}

// =============================================================================
// Checkout
// =============================================================================

/// Display the checkout page.
///
/// Mints the idempotency key for this checkout unless the session already
/// holds one from an earlier render.
#[instrument(skip(state, session, user))]
pub async fn checkout_page(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(user): OptionalAuth,
) -> Result<Response> {
    let cart = load_cart(&session).await;
    if cart.is_empty() {
        return Ok(Redirect::to(CART_PATH).into_response());
    }

    let form = match &user {
        Some(user) => {
            let address = ShippingRepository::new(state.pool())
                .get_by_user(user.id)
                .await?
                .ok_or_else(|| AppError::NotFound("shipping address".to_string()))?;
            ShippingForm::from(&address.details)
        }
        None => ShippingForm::default(),
    };

    let key = checkout_key(&session).await?;

    Ok(CheckoutTemplate {
        form,
        errors: FieldErrors::default(),
        cart: CartView::from(&cart),
        idempotency_key: key.to_string(),
        publishable_key: state.config().stripe.publishable_key.clone(),
        card_tag: PaymentMethod::CARD_TAG,
        regional_tag: PaymentMethod::REGIONAL_TAG,
    }
    .into_response())
}

/// Create the order and send the browser to the selected provider.
#[instrument(skip(state, session, user, form))]
pub async fn complete_order(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(user): OptionalAuth,
    Form(form): Form<CompleteOrderForm>,
) -> Result<Response> {
    let cart = load_cart(&session).await;
    if cart.is_empty() {
        return Ok(Redirect::to(CART_PATH).into_response());
    }

    let key = checkout_key(&session).await?;
    if let Some(echoed) = form.idempotency_key.as_deref()
        && echoed != key.to_string()
    {
        tracing::debug!(%key, echoed, "Checkout page key differs from session key");
    }

    let shipping = match form.shipping.validate() {
        Ok(details) => details,
        Err(errors) => {
            return Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                CheckoutTemplate {
                    form: form.shipping,
                    errors,
                    cart: CartView::from(&cart),
                    idempotency_key: key.to_string(),
                    publishable_key: state.config().stripe.publishable_key.clone(),
                    card_tag: PaymentMethod::CARD_TAG,
                    regional_tag: PaymentMethod::REGIONAL_TAG,
                },
            )
                .into_response());
        }
    };

    let method = PaymentMethod::from_tag(form.payment_tag.as_deref());
    let service = CheckoutService::new(
        state.store(),
        state.stripe(),
        state.yookassa(),
        state.checkout_settings(),
    );

    let request = CheckoutRequest {
        user: user.as_ref().map(|u| u.id),
        shipping,
        method,
        cart: &cart,
        idempotency_key: key,
    };

    match service.complete(request).await {
        Ok(outcome) => {
            let order_id = outcome.order.id.to_string();
            add_breadcrumb(
                "checkout",
                if outcome.reused {
                    "Checkout resubmitted"
                } else {
                    "Order created"
                },
                Some(&[("order_id", order_id.as_str())]),
            );
            Ok(Redirect::to(&outcome.redirect_url).into_response())
        }
        Err(CheckoutError::EmptyCart) => Ok(Redirect::to(CART_PATH).into_response()),
        Err(
            CheckoutError::StaleSubmission(order_id) | CheckoutError::SubmissionChanged(order_id),
        ) => {
            tracing::info!(%order_id, "Checkout key no longer fits this submission, minting a new one");
            session
                .remove::<IdempotencyKey>(session_keys::CHECKOUT_IDEMPOTENCY_KEY)
                .await?;
            Ok(Redirect::to(CHECKOUT_PATH).into_response())
        }
        Err(err @ CheckoutError::Payment { .. }) => {
            let event_id = sentry::capture_error(&err);
            tracing::error!(error = %err, sentry_event_id = %event_id, "Checkout payment failed");
            Ok(Redirect::to(FAILURE_PATH).into_response())
        }
        Err(CheckoutError::InvalidCart(e)) => Err(AppError::BadRequest(e.to_string())),
        Err(CheckoutError::Repository(e)) => Err(e.into()),
    }
}

// =============================================================================
// Results
// =============================================================================

/// Payment success page. Empties the cart and retires the checkout key.
#[instrument(skip(session))]
pub async fn payment_success(session: Session) -> Result<PaymentSuccessTemplate> {
    session.remove_value(session_keys::CART).await?;
    session
        .remove_value(session_keys::CHECKOUT_IDEMPOTENCY_KEY)
        .await?;
    Ok(PaymentSuccessTemplate)
}

/// Payment failed page. Also the card gateway's cancel target.
///
/// The cart is kept so the buyer can edit it or pick another method; the key
/// is retired so the next attempt is a fresh order.
#[instrument(skip(session))]
pub async fn payment_failed(session: Session) -> Result<PaymentFailedTemplate> {
    session
        .remove_value(session_keys::CHECKOUT_IDEMPOTENCY_KEY)
        .await?;
    Ok(PaymentFailedTemplate)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::{Body, to_bytes},
        extract::FromRequest,
        http::{Request, header},
    };
    use tower::ServiceExt;
    use tower_sessions::{MemoryStore, SessionManagerLayer};

    use super::*;
    use crate::routes::routes;
    use crate::state::tests::test_state;

    fn app() -> Router {
        routes()
            .layer(SessionManagerLayer::new(MemoryStore::default()))
            .with_state(test_state())
    }

    async fn get(uri: &str) -> Response {
        app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn test_shipping_requires_login() {
        let response = get("/payment/shipping").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/account/login?next=/payment/shipping");
    }

    #[tokio::test]
    async fn test_checkout_with_empty_cart_redirects_to_cart() {
        let response = get("/payment/checkout").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/cart");
    }

    #[tokio::test]
    async fn test_complete_order_with_empty_cart_redirects_to_cart() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/payment/complete-order")
                    .header("x-forwarded-for", "203.0.113.7")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("name=Ann&stripe-payment=stripe-payment"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/cart");
    }

    #[tokio::test]
    async fn test_payment_failed_renders() {
        let response = get("/payment/payment-failed").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("Payment failed"));
    }

    #[tokio::test]
    async fn test_payment_success_does_not_claim_confirmation() {
        let response = get("/payment/payment-success").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("confirming your payment"));
        assert!(!html.contains("payment was received"));
    }

    #[tokio::test]
    async fn test_payment_success_clears_cart_and_key() {
        let store = Arc::new(MemoryStore::default());
        let session = Session::new(None, store, None);
        session
            .insert(session_keys::CART, crate::models::Cart::new())
            .await
            .unwrap();
        session
            .insert(session_keys::CHECKOUT_IDEMPOTENCY_KEY, IdempotencyKey::generate())
            .await
            .unwrap();

        payment_success(session.clone()).await.unwrap();

        assert!(
            session
                .get::<crate::models::Cart>(session_keys::CART)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            session
                .get::<IdempotencyKey>(session_keys::CHECKOUT_IDEMPOTENCY_KEY)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_payment_failed_keeps_cart_and_retires_key() {
        let session = Session::new(None, Arc::new(MemoryStore::default()), None);
        session
            .insert(session_keys::CART, crate::models::Cart::new())
            .await
            .unwrap();
        let key = checkout_key(&session).await.unwrap();

        payment_failed(session.clone()).await.unwrap();

        assert!(
            session
                .get::<crate::models::Cart>(session_keys::CART)
                .await
                .unwrap()
                .is_some()
        );
        assert_ne!(checkout_key(&session).await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_checkout_key_is_stable_within_session() {
        let session = Session::new(None, Arc::new(MemoryStore::default()), None);
        let first = checkout_key(&session).await.unwrap();
        let second = checkout_key(&session).await.unwrap();
        assert_eq!(first, second);

        session
            .remove_value(session_keys::CHECKOUT_IDEMPOTENCY_KEY)
            .await
            .unwrap();
        assert_ne!(checkout_key(&session).await.unwrap(), first);
    }

    async fn parse_form(body: &'static str) -> CompleteOrderForm {
        let request = Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        let Form(form) = Form::<CompleteOrderForm>::from_request(request, &())
            .await
            .unwrap();
        form
    }

    #[tokio::test]
    async fn test_complete_order_form_reads_payment_tag() {
        let form = parse_form(
            "name=Ann&email=ann%40example.com&street_address=1+Main&country=US&zip=10001&stripe-payment=stripe-payment",
        )
        .await;
        assert_eq!(form.shipping.name, "Ann");
        assert_eq!(form.shipping.email, "ann@example.com");
        assert_eq!(
            PaymentMethod::from_tag(form.payment_tag.as_deref()),
            PaymentMethod::Card
        );

        let form = parse_form("name=Ann&stripe-payment=yookassa-payment").await;
        assert_eq!(
            PaymentMethod::from_tag(form.payment_tag.as_deref()),
            PaymentMethod::Regional
        );

        let form = parse_form("name=Ann").await;
        assert!(form.payment_tag.is_none());
        assert_eq!(
            PaymentMethod::from_tag(form.payment_tag.as_deref()),
            PaymentMethod::Regional
        );
    }
}
