//! Read-model projections for the relay.
//!
//! One projection per entity kind, each owning its table (and child table,
//! where the entity has one):
//!
//! | Projection | Tables | Delete style |
//! |---|---|---|
//! | [`UserProjection`] | `users` | soft |
//! | [`SupplierProjection`] | `suppliers` | hard |
//! | [`ProductProjection`] | `products`, `product_variants` | hard, variants cascade |
//! | [`OrderProjection`] | `orders`, `order_items` | none; cancel by `order_number` |
//! | [`PostProjection`] | `posts` | soft |
//!
//! Every write is guarded by the stored `event_timestamp`: an envelope older
//! than the one last applied is reported as [`ApplyOutcome::Skipped`] and
//! leaves the row alone.
//!
//! # Example
//!
//! ```no_run
//! use relay_projections::all_projections;
//!
//! # fn example(pool: sqlx::PgPool) {
//! for projection in all_projections(&pool) {
//!     println!("{} handles {:?}", projection.name(), projection.event_types());
//! }
//! # }
//! ```
//!
//! [`ApplyOutcome::Skipped`]: relay_core::ApplyOutcome::Skipped

pub mod order;
pub mod payload;
pub mod post;
pub mod product;
pub mod supplier;
pub mod user;

pub use order::{OrderDocument, OrderItemRow, OrderProjection, OrderRow};
pub use payload::StoredAudit;
pub use post::{PostProjection, PostRow};
pub use product::{ProductDocument, ProductProjection, ProductRow, VariantRow};
pub use supplier::{SupplierProjection, SupplierRow};
pub use user::{UserProjection, UserRow};

use relay_core::Projection;
use sqlx::PgPool;
use std::sync::Arc;

/// Every projection, sharing one pool, ready for handler registration.
#[must_use]
pub fn all_projections(pool: &PgPool) -> Vec<Arc<dyn Projection>> {
    vec![
        Arc::new(UserProjection::new(pool.clone())),
        Arc::new(SupplierProjection::new(pool.clone())),
        Arc::new(ProductProjection::new(pool.clone())),
        Arc::new(OrderProjection::new(pool.clone())),
        Arc::new(PostProjection::new(pool.clone())),
    ]
}
