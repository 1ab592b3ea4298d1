//! User projection.
//!
//! `user.created` and `user.updated` both carry the full user document and
//! upsert it; `user.deleted` soft-deletes by stamping `deleted_at`, leaving
//! the row readable.

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
struct UserPayload {
    #[serde(deserialize_with = "nullable")]
    contact_info: ContactInfo,
    #[serde(deserialize_with = "nullable")]
    profile: Profile,
    #[serde(deserialize_with = "crate::payload::whole_opt")]
    version: Option<i64>,
    #[serde(with = "crate::payload::timestamp")]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContactInfo {
    primary_email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Profile {
    display_name: Option<String>,
    avatar: Option<String>,
    bio: Option<String>,
}

/// One row of the `users` table, without audit columns.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRow {
    /// Primary key (the envelope's `entity_id`)
    pub user_id: String,
    /// `contact_info.primary_email`
    pub email: String,
    /// `contact_info.phone`
    pub phone: Option<String>,
    /// `profile.display_name`
    pub display_name: String,
    /// `profile.avatar`
    pub avatar: Option<String>,
    /// `profile.bio`
    pub bio: Option<String>,
    /// Document version
    pub version: i64,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    /// Flatten a `user.created` / `user.updated` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Decode`] if the payload has the wrong shape.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let data: UserPayload = payload::decode(envelope)?;
        Ok(Self {
            user_id: envelope.entity_id.clone(),
            email: data.contact_info.primary_email.unwrap_or_default(),
            phone: data.contact_info.phone,
            display_name: data.profile.display_name.unwrap_or_default(),
            avatar: data.profile.avatar,
            bio: data.profile.bio,
            version: data.version.unwrap_or(1),
            deleted_at: data.deleted_at,
            created_at: data.created_at.unwrap_or(envelope.timestamp),
            updated_at: data.updated_at.unwrap_or(envelope.timestamp),
        })
    }
}

const EVENT_TYPES: &[EventType] = &[
    EventType::UserCreated,
    EventType::UserUpdated,
    EventType::UserDeleted,
];

/// Maintains the `users` table.
#[derive(Debug, Clone)]
pub struct UserProjection {
    pool: PgPool,
}

impl UserProjection {
    /// Create a projection writing through `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite a user, unless the stored row is newer.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] or [`ProjectionError::Constraint`].
    pub async fn upsert(&self, row: &UserRow, audit: EventAudit) -> Result<ApplyOutcome> {
        let applied = sqlx::query(
            r"
            INSERT INTO users
                (user_id, email, phone, display_name, avatar, bio, version,
                 deleted_at, created_at, updated_at, event_id, event_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_id) DO UPDATE
            SET email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                display_name = EXCLUDED.display_name,
                avatar = EXCLUDED.avatar,
                bio = EXCLUDED.bio,
                version = EXCLUDED.version,
                deleted_at = EXCLUDED.deleted_at,
                updated_at = EXCLUDED.updated_at,
                event_id = EXCLUDED.event_id,
                event_timestamp = EXCLUDED.event_timestamp
            WHERE users.event_timestamp IS NULL
               OR users.event_timestamp <= EXCLUDED.event_timestamp
            RETURNING user_id
            ",
        )
        .bind(&row.user_id)
        .bind(&row.email)
        .bind(&row.phone)
        .bind(&row.display_name)
        .bind(&row.avatar)
        .bind(&row.bio)
        .bind(row.version)
        .bind(row.deleted_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(audit.event_id)
        .bind(audit.event_timestamp)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to upsert user", &e))?
        .is_some();

        Ok(if applied {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Skipped
        })
    }

    /// Mark a user deleted, keeping the first deletion time.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the update fails.
    pub async fn soft_delete(&self, user_id: &str, audit: EventAudit) -> Result<ApplyOutcome> {
        let result = sqlx::query(
            r"
            UPDATE users
            SET deleted_at = COALESCE(deleted_at, now()),
                event_id = $2,
                event_timestamp = $3
            WHERE user_id = $1
              AND (event_timestamp IS NULL OR event_timestamp <= $3)
            ",
        )
        .bind(user_id)
        .bind(audit.event_id)
        .bind(audit.event_timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("Failed to soft-delete user", &e))?;

        Ok(if result.rows_affected() > 0 {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Skipped
        })
    }

    /// Load one user, deleted or not.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn get(&self, user_id: &str) -> Result<Option<UserRow>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT user_id, email, phone, display_name, avatar, bio, version,
                    deleted_at, created_at, updated_at
             FROM users
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to query user", &e))
    }

    /// Audit columns of one user.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn audit(&self, user_id: &str) -> Result<Option<StoredAudit>> {
        payload::read_audit(&self.pool, "users", "user_id", user_id).await
    }
}

impl Projection for UserProjection {
    fn name(&self) -> &str {
        "users"
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
                Some(EventType::UserCreated | EventType::UserUpdated) => {
                    let row = UserRow::from_envelope(envelope)?;
                    self.upsert(&row, envelope.audit()).await?
                }
                Some(EventType::UserDeleted) => {
                    self.soft_delete(&envelope.entity_id, envelope.audit()).await?
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
                user_id = %envelope.entity_id,
                outcome = outcome.as_str(),
                "User projection updated"
            );
            Ok(outcome)
        })
    }
}
