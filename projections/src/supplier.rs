//! Supplier projection.
//!
//! Suppliers are hard-deleted: `supplier.deleted` removes the row.

use chrono::{DateTime, Utc};
use relay_core::envelope::{Envelope, EventAudit};
use relay_core::projection::{ApplyOutcome, Projection, ProjectionError, Result};
use relay_core::topic::EventType;
use serde::Deserialize;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;

use crate::payload::{self, StoredAudit, classify, nullable};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SupplierPayload {
    #[serde(deserialize_with = "nullable")]
    contact_info: ContactInfo,
    #[serde(deserialize_with = "nullable")]
    company_info: CompanyInfo,
    #[serde(deserialize_with = "nullable")]
    business_info: BusinessInfo,
    #[serde(with = "crate::payload::timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContactInfo {
    primary_email: Option<String>,
    primary_phone: Option<String>,
    contact_person_name: Option<String>,
    contact_person_title: Option<String>,
    contact_person_email: Option<String>,
    contact_person_phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CompanyInfo {
    legal_name: Option<String>,
    dba_name: Option<String>,
    #[serde(deserialize_with = "nullable")]
    business_address: Address,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Address {
    street_address_1: Option<String>,
    street_address_2: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BusinessInfo {
    support_email: Option<String>,
    support_phone: Option<String>,
    facebook_url: Option<String>,
    instagram_handle: Option<String>,
    twitter_handle: Option<String>,
    linkedin_url: Option<String>,
    timezone: Option<String>,
}

/// One row of the `suppliers` table, without audit columns.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SupplierRow {
    /// Primary key (the envelope's `entity_id`)
    pub supplier_id: String,
    /// `contact_info.primary_email`
    pub email: String,
    /// `contact_info.primary_phone`
    pub primary_phone: String,
    /// `contact_info.contact_person_name`
    pub contact_person_name: Option<String>,
    /// `contact_info.contact_person_title`
    pub contact_person_title: Option<String>,
    /// `contact_info.contact_person_email`
    pub contact_person_email: Option<String>,
    /// `contact_info.contact_person_phone`
    pub contact_person_phone: Option<String>,
    /// `company_info.legal_name`
    pub legal_name: String,
    /// `company_info.dba_name`
    pub dba_name: Option<String>,
    /// Business address line 1
    pub street_address_1: Option<String>,
    /// Business address line 2
    pub street_address_2: Option<String>,
    /// Business address city
    pub city: Option<String>,
    /// Business address state
    pub state: Option<String>,
    /// Business address postal code
    pub zip_code: Option<String>,
    /// Business address country
    pub country: Option<String>,
    /// `business_info.support_email`
    pub support_email: Option<String>,
    /// `business_info.support_phone`
    pub support_phone: Option<String>,
    /// `business_info.facebook_url`
    pub facebook_url: Option<String>,
    /// `business_info.instagram_handle`
    pub instagram_handle: Option<String>,
    /// `business_info.twitter_handle`
    pub twitter_handle: Option<String>,
    /// `business_info.linkedin_url`
    pub linkedin_url: Option<String>,
    /// `business_info.timezone`
    pub timezone: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl SupplierRow {
    /// Flatten a `supplier.created` / `supplier.updated` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Decode`] if the payload has the wrong shape.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let SupplierPayload {
            contact_info: contact,
            company_info: company,
            business_info: business,
            created_at,
            updated_at,
        } = payload::decode(envelope)?;
        let address = company.business_address;

        Ok(Self {
            supplier_id: envelope.entity_id.clone(),
            email: contact.primary_email.unwrap_or_default(),
            primary_phone: contact.primary_phone.unwrap_or_default(),
            contact_person_name: contact.contact_person_name,
            contact_person_title: contact.contact_person_title,
            contact_person_email: contact.contact_person_email,
            contact_person_phone: contact.contact_person_phone,
            legal_name: company.legal_name.unwrap_or_default(),
            dba_name: company.dba_name,
            street_address_1: address.street_address_1,
            street_address_2: address.street_address_2,
            city: address.city,
            state: address.state,
            zip_code: address.zip_code,
            country: address.country,
            support_email: business.support_email,
            support_phone: business.support_phone,
            facebook_url: business.facebook_url,
            instagram_handle: business.instagram_handle,
            twitter_handle: business.twitter_handle,
            linkedin_url: business.linkedin_url,
            timezone: business.timezone,
            created_at: created_at.unwrap_or(envelope.timestamp),
            updated_at: updated_at.unwrap_or(envelope.timestamp),
        })
    }
}

const EVENT_TYPES: &[EventType] = &[
    EventType::SupplierCreated,
    EventType::SupplierUpdated,
    EventType::SupplierDeleted,
];

/// Maintains the `suppliers` table.
#[derive(Debug, Clone)]
pub struct SupplierProjection {
    pool: PgPool,
}

impl SupplierProjection {
    /// Create a projection writing through `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite a supplier, unless the stored row is newer.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] or [`ProjectionError::Constraint`].
    pub async fn upsert(&self, row: &SupplierRow, audit: EventAudit) -> Result<ApplyOutcome> {
        let applied = sqlx::query(
            r"
            INSERT INTO suppliers
                (supplier_id, email, primary_phone,
                 contact_person_name, contact_person_title,
                 contact_person_email, contact_person_phone,
                 legal_name, dba_name,
                 street_address_1, street_address_2, city, state, zip_code, country,
                 support_email, support_phone, facebook_url, instagram_handle,
                 twitter_handle, linkedin_url, timezone,
                 created_at, updated_at, event_id, event_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            ON CONFLICT (supplier_id) DO UPDATE
            SET email = EXCLUDED.email,
                primary_phone = EXCLUDED.primary_phone,
                contact_person_name = EXCLUDED.contact_person_name,
                contact_person_title = EXCLUDED.contact_person_title,
                contact_person_email = EXCLUDED.contact_person_email,
                contact_person_phone = EXCLUDED.contact_person_phone,
                legal_name = EXCLUDED.legal_name,
                dba_name = EXCLUDED.dba_name,
                street_address_1 = EXCLUDED.street_address_1,
                street_address_2 = EXCLUDED.street_address_2,
                city = EXCLUDED.city,
                state = EXCLUDED.state,
                zip_code = EXCLUDED.zip_code,
                country = EXCLUDED.country,
                support_email = EXCLUDED.support_email,
                support_phone = EXCLUDED.support_phone,
                facebook_url = EXCLUDED.facebook_url,
                instagram_handle = EXCLUDED.instagram_handle,
                twitter_handle = EXCLUDED.twitter_handle,
                linkedin_url = EXCLUDED.linkedin_url,
                timezone = EXCLUDED.timezone,
                updated_at = EXCLUDED.updated_at,
                event_id = EXCLUDED.event_id,
                event_timestamp = EXCLUDED.event_timestamp
            WHERE suppliers.event_timestamp IS NULL
               OR suppliers.event_timestamp <= EXCLUDED.event_timestamp
            RETURNING supplier_id
            ",
        )
        .bind(&row.supplier_id)
        .bind(&row.email)
        .bind(&row.primary_phone)
        .bind(&row.contact_person_name)
        .bind(&row.contact_person_title)
        .bind(&row.contact_person_email)
        .bind(&row.contact_person_phone)
        .bind(&row.legal_name)
        .bind(&row.dba_name)
        .bind(&row.street_address_1)
        .bind(&row.street_address_2)
        .bind(&row.city)
        .bind(&row.state)
        .bind(&row.zip_code)
        .bind(&row.country)
        .bind(&row.support_email)
        .bind(&row.support_phone)
        .bind(&row.facebook_url)
        .bind(&row.instagram_handle)
        .bind(&row.twitter_handle)
        .bind(&row.linkedin_url)
        .bind(&row.timezone)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(audit.event_id)
        .bind(audit.event_timestamp)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to upsert supplier", &e))?
        .is_some();

        Ok(if applied {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Skipped
        })
    }

    /// Remove a supplier, unless the stored row is newer than the delete.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the delete fails.
    pub async fn delete(&self, supplier_id: &str, audit: EventAudit) -> Result<ApplyOutcome> {
        let result = sqlx::query(
            "DELETE FROM suppliers
             WHERE supplier_id = $1
               AND (event_timestamp IS NULL OR event_timestamp <= $2)",
        )
        .bind(supplier_id)
        .bind(audit.event_timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("Failed to delete supplier", &e))?;

        Ok(if result.rows_affected() > 0 {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Skipped
        })
    }

    /// Load one supplier.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn get(&self, supplier_id: &str) -> Result<Option<SupplierRow>> {
        sqlx::query_as::<_, SupplierRow>(
            "SELECT supplier_id, email, primary_phone,
                    contact_person_name, contact_person_title,
                    contact_person_email, contact_person_phone,
                    legal_name, dba_name,
                    street_address_1, street_address_2, city, state, zip_code, country,
                    support_email, support_phone, facebook_url, instagram_handle,
                    twitter_handle, linkedin_url, timezone, created_at, updated_at
             FROM suppliers
             WHERE supplier_id = $1",
        )
        .bind(supplier_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to query supplier", &e))
    }

    /// Audit columns of one supplier.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn audit(&self, supplier_id: &str) -> Result<Option<StoredAudit>> {
        payload::read_audit(&self.pool, "suppliers", "supplier_id", supplier_id).await
    }
}

impl Projection for SupplierProjection {
    fn name(&self) -> &str {
        "suppliers"
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
                Some(EventType::SupplierCreated | EventType::SupplierUpdated) => {
                    let row = SupplierRow::from_envelope(envelope)?;
                    self.upsert(&row, envelope.audit()).await?
                }
                Some(EventType::SupplierDeleted) => {
                    self.delete(&envelope.entity_id, envelope.audit()).await?
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
                supplier_id = %envelope.entity_id,
                outcome = outcome.as_str(),
                "Supplier projection updated"
            );
            Ok(outcome)
        })
    }
}
