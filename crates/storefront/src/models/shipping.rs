//! Shipping addresses and the form that edits them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lavka_core::{Email, ShippingAddressId, UserId};

/// Maximum lengths, mirrored by the column checks in the migration.
pub mod limits {
    pub const NAME: usize = 100;
    pub const STREET_ADDRESS: usize = 200;
    pub const APARTMENT_ADDRESS: usize = 100;
    pub const COUNTRY: usize = 100;
    pub const ZIP: usize = 20;
}

/// A stored shipping address.
///
/// Authenticated users own at most one; guest checkouts create a fresh row
/// with no owner each time.
#[derive(Debug, Clone, Serialize)]
pub struct ShippingAddress {
    pub id: ShippingAddressId,
    pub user_id: Option<UserId>,
    pub details: ShippingDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated address fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippingDetails {
    pub name: String,
    pub email: Email,
    pub street_address: String,
    pub apartment_address: Option<String>,
    pub country: String,
    pub zip: String,
}

/// Raw form fields as posted by the shipping and checkout pages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShippingForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub street_address: String,
    #[serde(default)]
    pub apartment_address: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub zip: String,
}

/// Per-field validation messages, in form order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<(&'static str, String)>);

impl FieldErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push((field, message.into()));
    }

    /// Message for a field, if it failed.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, message)| message.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(field, message)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(field, message)| (*field, message.as_str()))
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

fn required(
    errors: &mut FieldErrors,
    field: &'static str,
    value: &str,
    max: usize,
) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        errors.push(field, "This field is required.");
        return None;
    }
    if value.chars().count() > max {
        errors.push(field, format!("Must be at most {max} characters."));
        return None;
    }
    Some(value.to_owned())
}

impl ShippingForm {
    /// Validate and normalize the form.
    ///
    /// # Errors
    ///
    /// Returns every failing field so the page can show them all at once.
    pub fn validate(&self) -> Result<ShippingDetails, FieldErrors> {
        let mut errors = FieldErrors::default();

        let name = required(&mut errors, "name", &self.name, limits::NAME);
        let email = match Email::parse(&self.email) {
            Ok(email) => Some(email),
            Err(e) => {
                errors.push("email", e.to_string());
                None
            }
        };
        let street_address = required(
            &mut errors,
            "street_address",
            &self.street_address,
            limits::STREET_ADDRESS,
        );
        let apartment = self.apartment_address.trim();
        if apartment.chars().count() > limits::APARTMENT_ADDRESS {
            errors.push(
                "apartment_address",
                format!("Must be at most {} characters.", limits::APARTMENT_ADDRESS),
            );
        }
        let country = required(&mut errors, "country", &self.country, limits::COUNTRY);
        let zip = required(&mut errors, "zip", &self.zip, limits::ZIP);

        match (name, email, street_address, country, zip) {
            (Some(name), Some(email), Some(street_address), Some(country), Some(zip))
                if errors.is_empty() =>
            {
                Ok(ShippingDetails {
                    name,
                    email,
                    street_address,
                    apartment_address: (!apartment.is_empty()).then(|| apartment.to_owned()),
                    country,
                    zip,
                })
            }
            _ => Err(errors),
        }
    }
}

impl From<&ShippingDetails> for ShippingForm {
    fn from(details: &ShippingDetails) -> Self {
        Self {
            name: details.name.clone(),
            email: details.email.to_string(),
            street_address: details.street_address.clone(),
            apartment_address: details.apartment_address.clone().unwrap_or_default(),
            country: details.country.clone(),
            zip: details.zip.clone(),
        }
    }
}
