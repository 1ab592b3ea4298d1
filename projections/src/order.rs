//! Order projection.
//!
//! `order.created` carries the full order with its line items. Items are
//! replaced wholesale inside the same transaction as the order upsert.
//! `order.cancelled` carries only `{order_number}` and is resolved through
//! that natural key; it touches nothing but the status and audit columns.

use chrono::{DateTime, Utc};
use relay_core::envelope::{Envelope, EventAudit};
use relay_core::projection::{ApplyOutcome, Projection, ProjectionError, Result};
use relay_core::topic::EventType;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::future::Future;
use std::pin::Pin;

use crate::payload::{self, StoredAudit, classify, nullable, whole};

/// Status written by `order.cancelled`.
pub const CANCELLED: &str = "cancelled";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OrderPayload {
    order_number: Option<String>,
    #[serde(deserialize_with = "nullable")]
    customer: Customer,
    #[serde(deserialize_with = "nullable")]
    shipping_address: ShippingAddress,
    items: Option<Vec<ItemPayload>>,
    status: Option<String>,
    #[serde(with = "crate::payload::timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Customer {
    user_id: Option<String>,
    display_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShippingAddress {
    recipient_name: Option<String>,
    phone: Option<String>,
    street_address_1: Option<String>,
    street_address_2: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemPayload {
    item_id: Option<String>,
    #[serde(deserialize_with = "nullable")]
    product_snapshot: ProductSnapshot,
    #[serde(deserialize_with = "whole")]
    quantity: i64,
    #[serde(deserialize_with = "whole")]
    unit_price_cents: i64,
    #[serde(deserialize_with = "whole")]
    final_price_cents: i64,
    #[serde(deserialize_with = "whole")]
    total_cents: i64,
    fulfillment_status: Option<String>,
    #[serde(deserialize_with = "whole")]
    shipped_quantity: i64,
    tracking_number: Option<String>,
    carrier: Option<String>,
    #[serde(with = "crate::payload::timestamp")]
    shipped_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProductSnapshot {
    product_id: Option<String>,
    supplier_id: Option<String>,
    product_name: Option<String>,
    variant_name: Option<String>,
    variant_attributes: Option<Value>,
    image_url: Option<String>,
    supplier_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CancelPayload {
    order_number: Option<String>,
}

/// One row of the `orders` table, without audit columns.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OrderRow {
    /// Primary key (the envelope's `entity_id`)
    pub order_id: String,
    /// Human-facing order number, unique
    pub order_number: String,
    /// `customer.user_id`
    pub customer_user_id: String,
    /// `customer.display_name`
    pub customer_display_name: Option<String>,
    /// `customer.email`
    pub customer_email: Option<String>,
    /// `customer.phone`
    pub customer_phone: Option<String>,
    /// `shipping_address.recipient_name`
    pub shipping_recipient_name: Option<String>,
    /// `shipping_address.phone`
    pub shipping_phone: Option<String>,
    /// `shipping_address.street_address_1`
    pub shipping_street_1: Option<String>,
    /// `shipping_address.street_address_2`
    pub shipping_street_2: Option<String>,
    /// `shipping_address.city`
    pub shipping_city: Option<String>,
    /// `shipping_address.state`
    pub shipping_state: Option<String>,
    /// `shipping_address.zip_code`
    pub shipping_zip_code: Option<String>,
    /// `shipping_address.country`
    pub shipping_country: Option<String>,
    /// Order status, as declared by the source
    pub status: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// One row of the `order_items` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OrderItemRow {
    /// Item id, unique within the order
    pub item_id: String,
    /// `product_snapshot.product_id`
    pub product_id: String,
    /// `product_snapshot.supplier_id`
    pub supplier_id: String,
    /// `product_snapshot.product_name`
    pub product_name: Option<String>,
    /// `product_snapshot.variant_name`
    pub variant_name: Option<String>,
    /// `product_snapshot.variant_attributes`, `{}` when absent
    pub variant_attributes_json: Option<Value>,
    /// `product_snapshot.image_url`
    pub image_url: Option<String>,
    /// `product_snapshot.supplier_name`
    pub supplier_name: Option<String>,
    /// Units ordered
    pub quantity: i64,
    /// List price per unit in cents
    pub unit_price_cents: i64,
    /// Price per unit after discounts, in cents
    pub final_price_cents: i64,
    /// Line total in cents
    pub total_cents: i64,
    /// Defaults to `pending`
    pub fulfillment_status: Option<String>,
    /// Units shipped so far
    pub shipped_quantity: i64,
    /// Carrier tracking number
    pub tracking_number: Option<String>,
    /// Shipping carrier
    pub carrier: Option<String>,
    /// Shipment time
    pub shipped_at: Option<DateTime<Utc>>,
    /// Delivery time
    pub delivered_at: Option<DateTime<Utc>>,
}

/// A flattened order document.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDocument {
    /// The parent row.
    pub order: OrderRow,
    /// Replacement item set; `None` leaves stored items untouched.
    pub items: Option<Vec<OrderItemRow>>,
}

impl OrderDocument {
    /// Flatten an `order.created` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Decode`] if the payload has the wrong shape.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let data: OrderPayload = payload::decode(envelope)?;
        let customer = data.customer;
        let ship = data.shipping_address;

        let items = data.items.map(|items| {
            items
                .into_iter()
                .map(|item| {
                    let snap = item.product_snapshot;
                    OrderItemRow {
                        item_id: item.item_id.unwrap_or_default(),
                        product_id: snap.product_id.unwrap_or_default(),
                        supplier_id: snap.supplier_id.unwrap_or_default(),
                        product_name: snap.product_name,
                        variant_name: snap.variant_name,
                        variant_attributes_json: Some(
                            snap.variant_attributes
                                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                        ),
                        image_url: snap.image_url,
                        supplier_name: snap.supplier_name,
                        quantity: item.quantity,
                        unit_price_cents: item.unit_price_cents,
                        final_price_cents: item.final_price_cents,
                        total_cents: item.total_cents,
                        fulfillment_status: Some(
                            item.fulfillment_status
                                .unwrap_or_else(|| "pending".to_string()),
                        ),
                        shipped_quantity: item.shipped_quantity,
                        tracking_number: item.tracking_number,
                        carrier: item.carrier,
                        shipped_at: item.shipped_at,
                        delivered_at: item.delivered_at,
                    }
                })
                .collect()
        });

        Ok(Self {
            order: OrderRow {
                order_id: envelope.entity_id.clone(),
                order_number: data.order_number.unwrap_or_default(),
                customer_user_id: customer.user_id.unwrap_or_default(),
                customer_display_name: customer.display_name,
                customer_email: customer.email,
                customer_phone: customer.phone,
                shipping_recipient_name: ship.recipient_name,
                shipping_phone: ship.phone,
                shipping_street_1: ship.street_address_1,
                shipping_street_2: ship.street_address_2,
                shipping_city: ship.city,
                shipping_state: ship.state,
                shipping_zip_code: ship.zip_code,
                shipping_country: ship.country,
                status: data.status.unwrap_or_default(),
                created_at: data.created_at.unwrap_or(envelope.timestamp),
                updated_at: data.updated_at.unwrap_or(envelope.timestamp),
            },
            items,
        })
    }
}

/// Extract the natural key from an `order.cancelled` envelope.
///
/// # Errors
///
/// Returns [`ProjectionError::Decode`] if `order_number` is missing or empty.
pub fn cancelled_order_number(envelope: &Envelope) -> Result<String> {
    let data: CancelPayload = payload::decode(envelope)?;
    data.order_number
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            ProjectionError::Decode(format!(
                "order.cancelled for '{}' carries no order_number",
                envelope.entity_id
            ))
        })
}

const EVENT_TYPES: &[EventType] = &[EventType::OrderCreated, EventType::OrderCancelled];

/// Maintains the `orders` and `order_items` tables.
#[derive(Debug, Clone)]
pub struct OrderProjection {
    pool: PgPool,
}

impl OrderProjection {
    /// Create a projection writing through `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the order and, if it was applied, replace its items.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] or [`ProjectionError::Constraint`]
    /// (a second order claiming an existing `order_number`, duplicate item ids);
    /// on error nothing is written.
    pub async fn upsert(&self, doc: &OrderDocument, audit: EventAudit) -> Result<ApplyOutcome> {
        let row = &doc.order;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify("Failed to begin order transaction", &e))?;

        let applied = sqlx::query(
            r"
            INSERT INTO orders
                (order_id, order_number, customer_user_id, customer_display_name,
                 customer_email, customer_phone, shipping_recipient_name, shipping_phone,
                 shipping_street_1, shipping_street_2, shipping_city, shipping_state,
                 shipping_zip_code, shipping_country, status, created_at, updated_at,
                 event_id, event_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (order_id) DO UPDATE
            SET order_number = EXCLUDED.order_number,
                customer_user_id = EXCLUDED.customer_user_id,
                customer_display_name = EXCLUDED.customer_display_name,
                customer_email = EXCLUDED.customer_email,
                customer_phone = EXCLUDED.customer_phone,
                shipping_recipient_name = EXCLUDED.shipping_recipient_name,
                shipping_phone = EXCLUDED.shipping_phone,
                shipping_street_1 = EXCLUDED.shipping_street_1,
                shipping_street_2 = EXCLUDED.shipping_street_2,
                shipping_city = EXCLUDED.shipping_city,
                shipping_state = EXCLUDED.shipping_state,
                shipping_zip_code = EXCLUDED.shipping_zip_code,
                shipping_country = EXCLUDED.shipping_country,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at,
                event_id = EXCLUDED.event_id,
                event_timestamp = EXCLUDED.event_timestamp
            WHERE orders.event_timestamp IS NULL
               OR orders.event_timestamp <= EXCLUDED.event_timestamp
            RETURNING order_id
            ",
        )
        .bind(&row.order_id)
        .bind(&row.order_number)
        .bind(&row.customer_user_id)
        .bind(&row.customer_display_name)
        .bind(&row.customer_email)
        .bind(&row.customer_phone)
        .bind(&row.shipping_recipient_name)
        .bind(&row.shipping_phone)
        .bind(&row.shipping_street_1)
        .bind(&row.shipping_street_2)
        .bind(&row.shipping_city)
        .bind(&row.shipping_state)
        .bind(&row.shipping_zip_code)
        .bind(&row.shipping_country)
        .bind(&row.status)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(audit.event_id)
        .bind(audit.event_timestamp)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| classify("Failed to upsert order", &e))?
        .is_some();

        if !applied {
            tx.rollback()
                .await
                .map_err(|e| classify("Failed to roll back order transaction", &e))?;
            return Ok(ApplyOutcome::Skipped);
        }

        if let Some(items) = &doc.items {
            sqlx::query("DELETE FROM order_items WHERE order_id = $1")
                .bind(&row.order_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify("Failed to clear order items", &e))?;

            if !items.is_empty() {
                let mut insert: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                    "INSERT INTO order_items
                        (order_id, item_id, product_id, supplier_id, product_name,
                         variant_name, variant_attributes_json, image_url, supplier_name,
                         quantity, unit_price_cents, final_price_cents, total_cents,
                         fulfillment_status, shipped_quantity, tracking_number, carrier,
                         shipped_at, delivered_at) ",
                );
                insert.push_values(items, |mut b, item| {
                    b.push_bind(&row.order_id)
                        .push_bind(&item.item_id)
                        .push_bind(&item.product_id)
                        .push_bind(&item.supplier_id)
                        .push_bind(&item.product_name)
                        .push_bind(&item.variant_name)
                        .push_bind(&item.variant_attributes_json)
                        .push_bind(&item.image_url)
                        .push_bind(&item.supplier_name)
                        .push_bind(item.quantity)
                        .push_bind(item.unit_price_cents)
                        .push_bind(item.final_price_cents)
                        .push_bind(item.total_cents)
                        .push_bind(&item.fulfillment_status)
                        .push_bind(item.shipped_quantity)
                        .push_bind(&item.tracking_number)
                        .push_bind(&item.carrier)
                        .push_bind(item.shipped_at)
                        .push_bind(item.delivered_at);
                });
                insert
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify("Failed to insert order items", &e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| classify("Failed to commit order transaction", &e))?;

        Ok(ApplyOutcome::Applied)
    }

    /// Set an order's status to `cancelled`, located by `order_number`.
    ///
    /// Only `status`, `event_id` and `event_timestamp` change. Returns
    /// [`ApplyOutcome::Skipped`] when no order has that number or the stored
    /// row is newer.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the update fails.
    pub async fn cancel(&self, order_number: &str, audit: EventAudit) -> Result<ApplyOutcome> {
        let result = sqlx::query(
            r"
            UPDATE orders
            SET status = $2,
                event_id = $3,
                event_timestamp = $4
            WHERE order_number = $1
              AND (event_timestamp IS NULL OR event_timestamp <= $4)
            ",
        )
        .bind(order_number)
        .bind(CANCELLED)
        .bind(audit.event_id)
        .bind(audit.event_timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("Failed to cancel order", &e))?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                order_number = %order_number,
                "Cancellation matched no order (unknown number or newer row)"
            );
            return Ok(ApplyOutcome::Skipped);
        }
        Ok(ApplyOutcome::Applied)
    }

    /// Load one order by id.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn get(&self, order_id: &str) -> Result<Option<OrderRow>> {
        sqlx::query_as::<_, OrderRow>(
            "SELECT order_id, order_number, customer_user_id, customer_display_name,
                    customer_email, customer_phone, shipping_recipient_name, shipping_phone,
                    shipping_street_1, shipping_street_2, shipping_city, shipping_state,
                    shipping_zip_code, shipping_country, status, created_at, updated_at
             FROM orders
             WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to query order", &e))
    }

    /// List an order's items ordered by item id.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn items(&self, order_id: &str) -> Result<Vec<OrderItemRow>> {
        sqlx::query_as::<_, OrderItemRow>(
            "SELECT item_id, product_id, supplier_id, product_name, variant_name,
                    variant_attributes_json, image_url, supplier_name, quantity,
                    unit_price_cents, final_price_cents, total_cents, fulfillment_status,
                    shipped_quantity, tracking_number, carrier, shipped_at, delivered_at
             FROM order_items
             WHERE order_id = $1
             ORDER BY item_id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify("Failed to query order items", &e))
    }

    /// Audit columns of one order.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn audit(&self, order_id: &str) -> Result<Option<StoredAudit>> {
        payload::read_audit(&self.pool, "orders", "order_id", order_id).await
    }
}

impl Projection for OrderProjection {
    fn name(&self) -> &str {
        "orders"
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
                Some(EventType::OrderCreated) => {
                    let doc = OrderDocument::from_envelope(envelope)?;
                    self.upsert(&doc, envelope.audit()).await?
                }
                Some(EventType::OrderCancelled) => {
                    let order_number = cancelled_order_number(envelope)?;
                    self.cancel(&order_number, envelope.audit()).await?
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
                order_id = %envelope.entity_id,
                outcome = outcome.as_str(),
                "Order projection updated"
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

    #[test]
    fn flattens_customer_shipping_and_items() {
        let envelope = Envelope::new(
            EventType::OrderCreated,
            "o1",
            json!({
                "order_number": "ORD-0001",
                "customer": {"user_id": "u1", "display_name": "Ann", "email": "a@b.com"},
                "shipping_address": {"recipient_name": "Ann", "city": "Lisbon", "country": "PT"},
                "items": [{
                    "item_id": "i1",
                    "product_snapshot": {
                        "product_id": "p1",
                        "supplier_id": "s1",
                        "product_name": "Widget",
                        "variant_attributes": {"size": "M"}
                    },
                    "quantity": 2,
                    "unit_price_cents": 500,
                    "final_price_cents": 450,
                    "total_cents": 900,
                    "shipped_at": "2024-03-02T08:00:00Z"
                }],
                "status": "pending"
            }),
        );

        let doc = OrderDocument::from_envelope(&envelope).unwrap();
        assert_eq!(doc.order.order_number, "ORD-0001");
        assert_eq!(doc.order.customer_user_id, "u1");
        assert_eq!(doc.order.shipping_city.as_deref(), Some("Lisbon"));
        assert!(doc.order.shipping_street_1.is_none());
        assert_eq!(doc.order.status, "pending");

        let items = doc.items.unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.product_id, "p1");
        assert_eq!(item.variant_attributes_json, Some(json!({"size": "M"})));
        assert_eq!(item.total_cents, 900);
        assert_eq!(item.fulfillment_status.as_deref(), Some("pending"));
        assert_eq!(item.shipped_quantity, 0);
        assert!(item.shipped_at.is_some());
        assert!(item.delivered_at.is_none());
    }

    #[test]
    fn cancellation_needs_an_order_number() {
        let ok = Envelope::new(EventType::OrderCancelled, "o1", json!({"order_number": "ORD-1"}));
        assert_eq!(cancelled_order_number(&ok).unwrap(), "ORD-1");

        for data in [json!({}), json!({"order_number": ""}), json!({"order_number": null})] {
            let bad = Envelope::new(EventType::OrderCancelled, "o1", data);
            assert!(matches!(
                cancelled_order_number(&bad),
                Err(ProjectionError::Decode(_))
            ));
        }
    }

    #[test]
    fn missing_items_leave_children_alone() {
        let envelope = Envelope::new(EventType::OrderCreated, "o1", json!({"order_number": "N"}));
        assert!(OrderDocument::from_envelope(&envelope).unwrap().items.is_none());
    }
}
