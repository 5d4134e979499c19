//! Domain models for the storefront.
//!
//! These types represent validated domain objects separate from database row
//! types. Row structs live next to their queries in [`crate::db`].

pub mod cart;
pub mod order;
pub mod product;
pub mod session;
pub mod shipping;

pub use cart::{Cart, CartLine};
pub use order::{Order, OrderDraft, OrderDraftError, OrderItem, OrderItemDraft};
pub use product::Product;
pub use session::{CurrentUser, keys as session_keys};
pub use shipping::{FieldErrors, ShippingAddress, ShippingDetails, ShippingForm};
