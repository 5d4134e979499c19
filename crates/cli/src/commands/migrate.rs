//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! lavka-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Storefront migrations live in `crates/storefront/migrations/`:
//! ```text
//! migrations/
//! ├── 20261001000001_create_schema.sql
//! ├── 20261001000002_create_products.sql
//! ├── 20261001000003_create_shipping_addresses.sql
//! └── 20261001000004_create_orders.sql
//! ```
//!
//! The session table is owned by `tower-sessions-sqlx-store` and created
//! through its own `migrate`.

use tower_sessions_sqlx_store::PostgresStore;

use super::{CommandError, database_url};

/// Run storefront database migrations.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the connection fails, or
/// a migration fails to apply.
pub async fn storefront() -> Result<(), CommandError> {
    let database_url = database_url()?;

    tracing::info!("Connecting to storefront database...");
    let pool = lavka_storefront::db::create_pool(&database_url).await?;

    tracing::info!("Running storefront migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    tracing::info!("Creating session store table...");
    PostgresStore::new(pool).migrate().await?;

    tracing::info!("Storefront migrations complete!");
    Ok(())
}
