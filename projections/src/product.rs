//! Product projection.
//!
//! Every product event except `product.deleted` carries the full product
//! document, lifecycle transitions included (`published`, `discontinued`,
//! `out_of_stock`, `restored`); the status column is taken verbatim from the
//! payload. Variants live in `product_variants` and are replaced wholesale,
//! in the same transaction as the parent upsert, whenever the payload carries
//! a `variants` map. `product.deleted` removes the row and the variants
//! cascade.

use chrono::{DateTime, Utc};
use relay_core::envelope::{Envelope, EventAudit};
use relay_core::projection::{ApplyOutcome, Projection, ProjectionError, Result};
use relay_core::topic::EventType;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::payload::{self, StoredAudit, classify, nullable, whole, whole_opt};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProductPayload {
    supplier_id: Option<String>,
    #[serde(deserialize_with = "nullable")]
    supplier_info: SupplierInfo,
    name: Option<String>,
    short_description: Option<String>,
    category: Option<String>,
    unit_type: Option<String>,
    #[serde(deserialize_with = "nullable")]
    metadata: Metadata,
    #[serde(deserialize_with = "whole")]
    base_price_cents: i64,
    status: Option<String>,
    #[serde(deserialize_with = "nullable")]
    stats: Stats,
    variants: Option<BTreeMap<String, VariantPayload>>,
    #[serde(with = "crate::payload::timestamp")]
    published_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SupplierInfo {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Metadata {
    base_sku: Option<String>,
    brand: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Stats {
    #[serde(deserialize_with = "whole")]
    view_count: i64,
    #[serde(deserialize_with = "whole")]
    favorite_count: i64,
    #[serde(deserialize_with = "whole")]
    purchase_count: i64,
    #[serde(deserialize_with = "whole")]
    total_reviews: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VariantPayload {
    variant_id: Option<String>,
    variant_name: Option<String>,
    attributes: Option<Value>,
    #[serde(deserialize_with = "whole")]
    price_cents: i64,
    #[serde(deserialize_with = "whole_opt")]
    cost_cents: Option<i64>,
    #[serde(deserialize_with = "whole")]
    quantity: i64,
    #[serde(deserialize_with = "nullable")]
    package_dimensions: Dimensions,
    image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Dimensions {
    width_cm: Option<f64>,
    height_cm: Option<f64>,
    depth_cm: Option<f64>,
}

/// One row of the `products` table, without audit columns.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProductRow {
    /// Primary key
    pub product_id: String,
    /// Owning supplier
    pub supplier_id: String,
    /// `supplier_info.name`
    pub supplier_name: Option<String>,
    /// Display name
    pub name: String,
    /// Short description
    pub short_description: Option<String>,
    /// Category label
    pub category: String,
    /// Unit of sale
    pub unit_type: String,
    /// `metadata.base_sku`
    pub base_sku: Option<String>,
    /// `metadata.brand`
    pub brand: Option<String>,
    /// Base price in cents
    pub base_price_cents: i64,
    /// Lifecycle status, as declared by the source
    pub status: String,
    /// `stats.view_count`
    pub view_count: i64,
    /// `stats.favorite_count`
    pub favorite_count: i64,
    /// `stats.purchase_count`
    pub purchase_count: i64,
    /// `stats.total_reviews`
    pub total_reviews: i64,
    /// Publication time
    pub published_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// One row of the `product_variants` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct VariantRow {
    /// Key of the variant within the product's `variants` map
    pub variant_key: String,
    /// Source variant id
    pub variant_id: String,
    /// Display name
    pub variant_name: String,
    /// Free-form attributes
    pub attributes_json: Option<Value>,
    /// Price in cents
    pub price_cents: i64,
    /// Cost in cents
    pub cost_cents: Option<i64>,
    /// Units in stock
    pub quantity: i64,
    /// Package width
    pub width_cm: Option<f64>,
    /// Package height
    pub height_cm: Option<f64>,
    /// Package depth
    pub depth_cm: Option<f64>,
    /// Variant image
    pub image_url: Option<String>,
}

/// A flattened product document.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDocument {
    /// The parent row.
    pub product: ProductRow,
    /// Replacement variant set; `None` leaves stored variants untouched.
    pub variants: Option<Vec<VariantRow>>,
}

impl ProductDocument {
    /// Flatten any full-document product envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Decode`] if the payload has the wrong shape.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let data: ProductPayload = payload::decode(envelope)?;

        let variants = data.variants.map(|variants| {
            variants
                .into_iter()
                .map(|(variant_key, v)| VariantRow {
                    variant_key,
                    variant_id: v.variant_id.unwrap_or_default(),
                    variant_name: v.variant_name.unwrap_or_default(),
                    attributes_json: Some(
                        v.attributes.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                    ),
                    price_cents: v.price_cents,
                    cost_cents: v.cost_cents,
                    quantity: v.quantity,
                    width_cm: v.package_dimensions.width_cm,
                    height_cm: v.package_dimensions.height_cm,
                    depth_cm: v.package_dimensions.depth_cm,
                    image_url: v.image_url,
                })
                .collect()
        });

        Ok(Self {
            product: ProductRow {
                product_id: envelope.entity_id.clone(),
                supplier_id: data.supplier_id.unwrap_or_default(),
                supplier_name: data.supplier_info.name,
                name: data.name.unwrap_or_default(),
                short_description: data.short_description,
                category: data.category.unwrap_or_default(),
                unit_type: data.unit_type.unwrap_or_default(),
                base_sku: data.metadata.base_sku,
                brand: data.metadata.brand,
                base_price_cents: data.base_price_cents,
                status: data.status.unwrap_or_default(),
                view_count: data.stats.view_count,
                favorite_count: data.stats.favorite_count,
                purchase_count: data.stats.purchase_count,
                total_reviews: data.stats.total_reviews,
                published_at: data.published_at,
                created_at: data.created_at.unwrap_or(envelope.timestamp),
                updated_at: data.updated_at.unwrap_or(envelope.timestamp),
            },
            variants,
        })
    }
}

const EVENT_TYPES: &[EventType] = &[
    EventType::ProductCreated,
    EventType::ProductUpdated,
    EventType::ProductPublished,
    EventType::ProductDiscontinued,
    EventType::ProductOutOfStock,
    EventType::ProductRestored,
    EventType::ProductDeleted,
];

/// Maintains the `products` and `product_variants` tables.
#[derive(Debug, Clone)]
pub struct ProductProjection {
    pool: PgPool,
}

impl ProductProjection {
    /// Create a projection writing through `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the product and, if it was applied, replace its variants.
    ///
    /// Both writes share one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] or [`ProjectionError::Constraint`];
    /// on error nothing is written.
    pub async fn upsert(&self, doc: &ProductDocument, audit: EventAudit) -> Result<ApplyOutcome> {
        let row = &doc.product;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify("Failed to begin product transaction", &e))?;

        let applied = sqlx::query(
            r"
            INSERT INTO products
                (product_id, supplier_id, supplier_name, name, short_description,
                 category, unit_type, base_sku, brand, base_price_cents, status,
                 view_count, favorite_count, purchase_count, total_reviews,
                 published_at, created_at, updated_at, event_id, event_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (product_id) DO UPDATE
            SET supplier_id = EXCLUDED.supplier_id,
                supplier_name = EXCLUDED.supplier_name,
                name = EXCLUDED.name,
                short_description = EXCLUDED.short_description,
                category = EXCLUDED.category,
                unit_type = EXCLUDED.unit_type,
                base_sku = EXCLUDED.base_sku,
                brand = EXCLUDED.brand,
                base_price_cents = EXCLUDED.base_price_cents,
                status = EXCLUDED.status,
                view_count = EXCLUDED.view_count,
                favorite_count = EXCLUDED.favorite_count,
                purchase_count = EXCLUDED.purchase_count,
                total_reviews = EXCLUDED.total_reviews,
                published_at = EXCLUDED.published_at,
                updated_at = EXCLUDED.updated_at,
                event_id = EXCLUDED.event_id,
                event_timestamp = EXCLUDED.event_timestamp
            WHERE products.event_timestamp IS NULL
               OR products.event_timestamp <= EXCLUDED.event_timestamp
            RETURNING product_id
            ",
        )
        .bind(&row.product_id)
        .bind(&row.supplier_id)
        .bind(&row.supplier_name)
        .bind(&row.name)
        .bind(&row.short_description)
        .bind(&row.category)
        .bind(&row.unit_type)
        .bind(&row.base_sku)
        .bind(&row.brand)
        .bind(row.base_price_cents)
        .bind(&row.status)
        .bind(row.view_count)
        .bind(row.favorite_count)
        .bind(row.purchase_count)
        .bind(row.total_reviews)
        .bind(row.published_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(audit.event_id)
        .bind(audit.event_timestamp)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| classify("Failed to upsert product", &e))?
        .is_some();

        if !applied {
            tx.rollback()
                .await
                .map_err(|e| classify("Failed to roll back product transaction", &e))?;
            return Ok(ApplyOutcome::Skipped);
        }

        if let Some(variants) = &doc.variants {
            sqlx::query("DELETE FROM product_variants WHERE product_id = $1")
                .bind(&row.product_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify("Failed to clear product variants", &e))?;

            if !variants.is_empty() {
                let mut insert: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                    "INSERT INTO product_variants
                        (product_id, variant_key, variant_id, variant_name, attributes_json,
                         price_cents, cost_cents, quantity, width_cm, height_cm, depth_cm,
                         image_url) ",
                );
                insert.push_values(variants, |mut b, v| {
                    b.push_bind(&row.product_id)
                        .push_bind(&v.variant_key)
                        .push_bind(&v.variant_id)
                        .push_bind(&v.variant_name)
                        .push_bind(&v.attributes_json)
                        .push_bind(v.price_cents)
                        .push_bind(v.cost_cents)
                        .push_bind(v.quantity)
                        .push_bind(v.width_cm)
                        .push_bind(v.height_cm)
                        .push_bind(v.depth_cm)
                        .push_bind(&v.image_url);
                });
                insert
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify("Failed to insert product variants", &e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| classify("Failed to commit product transaction", &e))?;

        Ok(ApplyOutcome::Applied)
    }

    /// Remove a product; its variants cascade.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the delete fails.
    pub async fn delete(&self, product_id: &str, audit: EventAudit) -> Result<ApplyOutcome> {
        let result = sqlx::query(
            "DELETE FROM products
             WHERE product_id = $1
               AND (event_timestamp IS NULL OR event_timestamp <= $2)",
        )
        .bind(product_id)
        .bind(audit.event_timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("Failed to delete product", &e))?;

        Ok(if result.rows_affected() > 0 {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Skipped
        })
    }

    /// Load one product.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn get(&self, product_id: &str) -> Result<Option<ProductRow>> {
        sqlx::query_as::<_, ProductRow>(
            "SELECT product_id, supplier_id, supplier_name, name, short_description,
                    category, unit_type, base_sku, brand, base_price_cents, status,
                    view_count, favorite_count, purchase_count, total_reviews,
                    published_at, created_at, updated_at
             FROM products
             WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to query product", &e))
    }

    /// List a product's variants ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn variants(&self, product_id: &str) -> Result<Vec<VariantRow>> {
        sqlx::query_as::<_, VariantRow>(
            "SELECT variant_key, variant_id, variant_name, attributes_json,
                    price_cents, cost_cents, quantity, width_cm, height_cm, depth_cm,
                    image_url
             FROM product_variants
             WHERE product_id = $1
             ORDER BY variant_key",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify("Failed to query product variants", &e))
    }

    /// Audit columns of one product.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn audit(&self, product_id: &str) -> Result<Option<StoredAudit>> {
        payload::read_audit(&self.pool, "products", "product_id", product_id).await
    }
}

impl Projection for ProductProjection {
    fn name(&self) -> &str {
        "products"
    }

    fn event_types(&self) -> &[EventType] {
        EVENT_TYPES
    }

    fn apply<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<ApplyOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let outcome = match envelope.kind() {
                Some(EventType::ProductDeleted) => {
                    self.delete(&envelope.entity_id, envelope.audit()).await?
                }
                Some(kind) if EVENT_TYPES.contains(&kind) => {
                    let doc = ProductDocument::from_envelope(envelope)?;
                    self.upsert(&doc, envelope.audit()).await?
                }
                _ => {
                    return Err(ProjectionError::Unsupported {
                        projection: self.name().to_string(),
                        event_type: envelope.event_type.clone(),
                    });
                }
            };

            tracing::info!(
                event_type = %envelope.event_type,
                product_id = %envelope.entity_id,
                outcome = outcome.as_str(),
                "Product projection updated"
            );
            Ok(outcome)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(data: Value) -> ProductDocument {
        ProductDocument::from_envelope(&Envelope::new(EventType::ProductUpdated, "p1", data))
            .unwrap()
    }

    #[test]
    fn flattens_product_and_variants() {
        let doc = product(json!({
            "supplier_id": "s1",
            "supplier_info": {"name": "Acme"},
            "name": "Widget",
            "category": "tools",
            "unit_type": "piece",
            "metadata": {"base_sku": "W-1", "brand": "Acme"},
            "base_price_cents": 1299,
            "status": "published",
            "stats": {"view_count": 10, "total_reviews": 2},
            "variants": {
                "red": {
                    "variant_id": "v-red",
                    "variant_name": "Red",
                    "attributes": {"color": "red"},
                    "price_cents": 1399,
                    "quantity": 5,
                    "package_dimensions": {"width_cm": 10.0, "height_cm": 2.5}
                },
                "blue": {"variant_id": "v-blue", "price_cents": 1299}
            },
            "published_at": "2024-02-02T10:00:00Z"
        }));

        let row = &doc.product;
        assert_eq!(row.supplier_name.as_deref(), Some("Acme"));
        assert_eq!(row.base_sku.as_deref(), Some("W-1"));
        assert_eq!(row.base_price_cents, 1299);
        assert_eq!(row.status, "published");
        assert_eq!(row.view_count, 10);
        assert_eq!(row.favorite_count, 0);
        assert!(row.published_at.is_some());

        let variants = doc.variants.unwrap();
        let keys: Vec<&str> = variants.iter().map(|v| v.variant_key.as_str()).collect();
        assert_eq!(keys, vec!["blue", "red"]);

        let red = &variants[1];
        assert_eq!(red.attributes_json, Some(json!({"color": "red"})));
        assert_eq!(red.quantity, 5);
        assert_eq!(red.width_cm, Some(10.0));
        assert_eq!(red.depth_cm, None);

        let blue = &variants[0];
        assert_eq!(blue.variant_name, "");
        assert_eq!(blue.attributes_json, Some(json!({})));
        assert_eq!(blue.quantity, 0);
    }

    #[test]
    fn float_encoded_counts_are_accepted() {
        let doc = product(json!({
            "base_price_cents": 1299.0,
            "stats": {"view_count": 10.0},
            "variants": {"red": {"price_cents": 1399.0, "cost_cents": 700.0, "quantity": 5.0}}
        }));
        assert_eq!(doc.product.base_price_cents, 1299);
        assert_eq!(doc.product.view_count, 10);
        let red = &doc.variants.unwrap()[0];
        assert_eq!(red.price_cents, 1399);
        assert_eq!(red.cost_cents, Some(700));
        assert_eq!(red.quantity, 5);

        let fractional = Envelope::new(
            EventType::ProductUpdated,
            "p1",
            json!({"base_price_cents": 12.99}),
        );
        assert!(matches!(
            ProductDocument::from_envelope(&fractional),
            Err(ProjectionError::Decode(_))
        ));
    }

    #[test]
    fn absent_variants_leave_children_alone() {
        assert!(product(json!({"name": "Widget"})).variants.is_none());
        assert!(product(json!({"variants": null})).variants.is_none());
    }

    #[test]
    fn empty_variants_clear_children() {
        assert_eq!(product(json!({"variants": {}})).variants, Some(Vec::new()));
    }

    #[test]
    fn lifecycle_events_share_the_full_document_path() {
        for kind in [
            EventType::ProductPublished,
            EventType::ProductDiscontinued,
            EventType::ProductOutOfStock,
            EventType::ProductRestored,
        ] {
            assert!(EVENT_TYPES.contains(&kind));
            let envelope = Envelope::new(kind, "p1", json!({"status": "whatever-the-source-says"}));
            let doc = ProductDocument::from_envelope(&envelope).unwrap();
            assert_eq!(doc.product.status, "whatever-the-source-says");
        }
    }
}
