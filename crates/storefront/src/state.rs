//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::PgCheckoutStore;
use crate::payments::{PaymentError, StripeClient, YooKassaClient, yookassa};
use crate::services::CheckoutSettings;

/// Path of the page providers return to after a successful payment.
pub const SUCCESS_PATH: &str = "/payment/payment-success";

/// Path of the page providers return to after a cancelled or failed payment.
pub const FAILURE_PATH: &str = "/payment/payment-failed";

/// Error building application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid return url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("payment client: {0}")]
    Payment(#[from] PaymentError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    store: PgCheckoutStore,
    stripe: StripeClient,
    yookassa: YooKassaClient,
    checkout: CheckoutSettings,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `pool` - `PostgreSQL` connection pool
    ///
    /// # Errors
    ///
    /// Returns an error if the return URLs cannot be built or an HTTP client
    /// fails to initialize.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, StateError> {
        let stripe = StripeClient::new(&config.stripe)?;
        let yookassa = YooKassaClient::new(&config.yookassa)?;
        let checkout = CheckoutSettings {
            success_url: config.absolute_url(SUCCESS_PATH)?.to_string(),
            cancel_url: config.absolute_url(FAILURE_PATH)?.to_string(),
            card_currency: config.stripe.currency,
            conversion_rate: config.yookassa.conversion_rate,
            test_mode: config.yookassa.test_mode,
            description: yookassa::DEFAULT_DESCRIPTION.to_string(),
        };

        Ok(Self {
            inner: Arc::new(AppStateInner {
                store: PgCheckoutStore::new(pool.clone()),
                config,
                pool,
                stripe,
                yookassa,
                checkout,
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Checkout persistence over the pool.
    #[must_use]
    pub fn store(&self) -> &PgCheckoutStore {
        &self.inner.store
    }

    /// Get a reference to the Stripe client.
    #[must_use]
    pub fn stripe(&self) -> &StripeClient {
        &self.inner.stripe
    }

    /// Get a reference to the YooKassa client.
    #[must_use]
    pub fn yookassa(&self) -> &YooKassaClient {
        &self.inner.yookassa
    }

    /// Provider request settings derived from configuration.
    #[must_use]
    pub fn checkout_settings(&self) -> &CheckoutSettings {
        &self.inner.checkout
    }
}
