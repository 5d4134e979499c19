//! Shipping address repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use lavka_core::{Email, ShippingAddressId, UserId};

use super::RepositoryError;
use crate::models::{ShippingAddress, ShippingDetails};

#[derive(Debug, sqlx::FromRow)]
struct ShippingAddressRow {
    id: ShippingAddressId,
    user_id: Option<UserId>,
    name: String,
    email: String,
    street_address: String,
    apartment_address: Option<String>,
    country: String,
    zip: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShippingAddressRow> for ShippingAddress {
    type Error = RepositoryError;

    fn try_from(row: ShippingAddressRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            details: ShippingDetails {
                name: row.name,
                email,
                street_address: row.street_address,
                apartment_address: row.apartment_address,
                country: row.country,
                zip: row.zip,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "id, user_id, name, email, street_address, apartment_address, \
                       country, zip, created_at, updated_at";

/// Repository for shipping addresses.
pub struct ShippingRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ShippingRepository<'a> {
    /// Create a new shipping address repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get the address owned by a user.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if the stored email is invalid.
    #[instrument(skip(self))]
    pub async fn get_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<ShippingAddress>, RepositoryError> {
        let row = sqlx::query_as::<_, ShippingAddressRow>(&format!(
            "SELECT {COLUMNS} FROM storefront.shipping_address WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(ShippingAddress::try_from).transpose()
    }

    /// Create or replace the user's address from the shipping form.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self, details))]
    pub async fn upsert_for_user(
        &self,
        user_id: UserId,
        details: &ShippingDetails,
    ) -> Result<ShippingAddress, RepositoryError> {
        let row = sqlx::query_as::<_, ShippingAddressRow>(&format!(
            r"
            INSERT INTO storefront.shipping_address
                (user_id, name, email, street_address, apartment_address, country, zip)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                street_address = EXCLUDED.street_address,
                apartment_address = EXCLUDED.apartment_address,
                country = EXCLUDED.country,
                zip = EXCLUDED.zip,
                updated_at = NOW()
            RETURNING {COLUMNS}
            "
        ))
        .bind(user_id)
        .bind(&details.name)
        .bind(&details.email)
        .bind(&details.street_address)
        .bind(details.apartment_address.as_deref())
        .bind(&details.country)
        .bind(&details.zip)
        .fetch_one(self.pool)
        .await?;

        row.try_into()
    }

    /// Return the user's address, creating it from `details` if missing.
    ///
    /// An existing address is returned unchanged; `details` are defaults only.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self, details))]
    pub async fn get_or_create_for_user(
        &self,
        user_id: UserId,
        details: &ShippingDetails,
    ) -> Result<ShippingAddress, RepositoryError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, ShippingAddressRow>(&format!(
            r"
            INSERT INTO storefront.shipping_address
                (user_id, name, email, street_address, apartment_address, country, zip)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING {COLUMNS}
            "
        ))
        .bind(user_id)
        .bind(&details.name)
        .bind(&details.email)
        .bind(&details.street_address)
        .bind(details.apartment_address.as_deref())
        .bind(&details.country)
        .bind(&details.zip)
        .fetch_one(self.pool)
        .await?;

        row.try_into()
    }

    /// Create an ownerless address for a guest checkout.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self, details))]
    pub async fn create_guest(
        &self,
        details: &ShippingDetails,
    ) -> Result<ShippingAddress, RepositoryError> {
        let row = sqlx::query_as::<_, ShippingAddressRow>(&format!(
            r"
            INSERT INTO storefront.shipping_address
                (user_id, name, email, street_address, apartment_address, country, zip)
            VALUES (NULL, $1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "
        ))
        .bind(&details.name)
        .bind(&details.email)
        .bind(&details.street_address)
        .bind(details.apartment_address.as_deref())
        .bind(&details.country)
        .bind(&details.zip)
        .fetch_one(self.pool)
        .await?;

        row.try_into()
    }
}
