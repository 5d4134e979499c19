//! Seed the product catalog from a YAML file.
//!
//! The file is a list of products:
//!
//! ```yaml
//! - name: Buckwheat honey, 500 g
//!   price: "12.50"
//! ```
//!
//! Products are matched by name, so re-running the command updates prices
//! instead of inserting duplicates.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use lavka_storefront::db::{ProductRepository, create_pool};

use super::{CommandError, database_url};

/// One product entry in the seed file.
#[derive(Debug, Deserialize)]
pub struct SeedProduct {
    pub name: String,
    pub price: Decimal,
}

/// Parse and validate seed file contents.
///
/// # Errors
///
/// Returns an error if the YAML is malformed, a name is blank or duplicated,
/// or a price is negative.
pub fn parse(content: &str) -> Result<Vec<SeedProduct>, CommandError> {
    let products: Vec<SeedProduct> = serde_yaml::from_str(content)?;

    let mut seen = std::collections::HashSet::new();
    for product in &products {
        let name = product.name.trim();
        if name.is_empty() {
            return Err(CommandError::Invalid("product name is blank".to_string()));
        }
        if product.price.is_sign_negative() {
            return Err(CommandError::Invalid(format!(
                "product '{name}' has a negative price"
            )));
        }
        if !seen.insert(name) {
            return Err(CommandError::Invalid(format!(
                "product '{name}' is listed twice"
            )));
        }
    }

    Ok(products)
}

/// Insert or update the products listed in `file_path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or validated, or a database
/// operation fails.
pub async fn products(file_path: &str) -> Result<(), CommandError> {
    let path = Path::new(file_path);
    info!(path = %file_path, "Loading products from file");

    // Read and validate before connecting to database
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CommandError::Io {
            path: file_path.to_string(),
            source,
        })?;
    let products = parse(&content)?;
    info!(count = products.len(), "Parsed seed file");

    let pool = create_pool(&database_url()?).await?;
    let repo = ProductRepository::new(&pool);

    for product in &products {
        let saved = repo.upsert(product.name.trim(), product.price).await?;
        info!(id = %saved.id, name = %saved.name, price = %saved.price, "Seeded product");
    }

    let available = repo.list_available().await?;
    info!(
        seeded = products.len(),
        available = available.len(),
        "Seeding complete"
    );
    Ok(())
}
