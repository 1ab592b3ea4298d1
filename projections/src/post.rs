//! Post projection.

use chrono::{DateTime, Utc};
use relay_core::envelope::{Envelope, EventAudit};
use relay_core::projection::{ApplyOutcome, Projection, ProjectionError, Result};
use relay_core::topic::EventType;
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;

use crate::payload::{self, StoredAudit, classify, nullable, whole};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PostPayload {
    post_type: Option<String>,
    #[serde(deserialize_with = "nullable")]
    author: Author,
    text_content: Option<String>,
    #[serde(deserialize_with = "nullable")]
    media: Vec<Value>,
    #[serde(deserialize_with = "nullable")]
    link_preview: LinkPreview,
    #[serde(deserialize_with = "nullable")]
    stats: Stats,
    #[serde(with = "crate::payload::timestamp")]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    published_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::payload::timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Author {
    user_id: Option<String>,
    display_name: Option<String>,
    avatar: Option<String>,
    author_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LinkPreview {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    image: Option<String>,
    site_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Stats {
    #[serde(deserialize_with = "whole")]
    view_count: i64,
    #[serde(deserialize_with = "whole")]
    like_count: i64,
    #[serde(deserialize_with = "whole")]
    comment_count: i64,
    #[serde(deserialize_with = "whole")]
    share_count: i64,
    #[serde(deserialize_with = "whole")]
    save_count: i64,
    #[serde(deserialize_with = "nullable")]
    engagement_rate: f64,
    #[serde(with = "crate::payload::timestamp")]
    last_comment_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeletePayload {
    post_id: Option<String>,
}

/// One row of the `posts` table, without audit columns.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PostRow {
    /// Primary key (the envelope's `entity_id`)
    pub post_id: String,
    /// Post kind, verbatim
    pub post_type: String,
    /// `author.user_id`
    pub author_user_id: String,
    /// `author.display_name`
    pub author_display_name: Option<String>,
    /// `author.avatar`
    pub author_avatar: Option<String>,
    /// `author.author_type`
    pub author_type: Option<String>,
    /// Body text
    pub text_content: Option<String>,
    /// `media[]` as a JSON array, `None` when the post has no media
    pub media_json: Option<Value>,
    /// `link_preview.url`
    pub link_url: Option<String>,
    /// `link_preview.title`
    pub link_title: Option<String>,
    /// `link_preview.description`
    pub link_description: Option<String>,
    /// `link_preview.image`
    pub link_image: Option<String>,
    /// `link_preview.site_name`
    pub link_site_name: Option<String>,
    /// `stats.view_count`
    pub view_count: i64,
    /// `stats.like_count`
    pub like_count: i64,
    /// `stats.comment_count`
    pub comment_count: i64,
    /// `stats.share_count`
    pub share_count: i64,
    /// `stats.save_count`
    pub save_count: i64,
    /// `stats.engagement_rate`
    pub engagement_rate: f64,
    /// `stats.last_comment_at`
    pub last_comment_at: Option<DateTime<Utc>>,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
    /// Publication time
    pub published_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl PostRow {
    /// Flatten a `post.created` / `post.updated` / `post.published` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Decode`] if the payload has the wrong shape.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let data: PostPayload = payload::decode(envelope)?;
        let author = data.author;
        let link = data.link_preview;
        let stats = data.stats;

        Ok(Self {
            post_id: envelope.entity_id.clone(),
            post_type: data.post_type.unwrap_or_default(),
            author_user_id: author.user_id.unwrap_or_default(),
            author_display_name: author.display_name,
            author_avatar: author.avatar,
            author_type: author.author_type,
            text_content: data.text_content,
            media_json: (!data.media.is_empty()).then(|| Value::Array(data.media)),
            link_url: link.url,
            link_title: link.title,
            link_description: link.description,
            link_image: link.image,
            link_site_name: link.site_name,
            view_count: stats.view_count,
            like_count: stats.like_count,
            comment_count: stats.comment_count,
            share_count: stats.share_count,
            save_count: stats.save_count,
            engagement_rate: stats.engagement_rate,
            last_comment_at: stats.last_comment_at,
            deleted_at: data.deleted_at,
            published_at: data.published_at,
            created_at: data.created_at.unwrap_or(envelope.timestamp),
            updated_at: data.updated_at.unwrap_or(envelope.timestamp),
        })
    }
}

/// Post id named by a `post.deleted` envelope: `data.post_id`, else the entity id.
///
/// # Errors
///
/// Returns [`ProjectionError::Decode`] if `data` is not an object.
pub fn deleted_post_id(envelope: &Envelope) -> Result<String> {
    let data: DeletePayload = payload::decode(envelope)?;
    Ok(data
        .post_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| envelope.entity_id.clone()))
}

const EVENT_TYPES: &[EventType] = &[
    EventType::PostCreated,
    EventType::PostUpdated,
    EventType::PostPublished,
    EventType::PostDeleted,
];

/// Maintains the `posts` table.
#[derive(Debug, Clone)]
pub struct PostProjection {
    pool: PgPool,
}

impl PostProjection {
    /// Create a projection writing through `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite a post, unless the stored row is newer.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] or [`ProjectionError::Constraint`].
    pub async fn upsert(&self, row: &PostRow, audit: EventAudit) -> Result<ApplyOutcome> {
        let applied = sqlx::query(
            r"
            INSERT INTO posts
                (post_id, post_type, author_user_id, author_display_name, author_avatar,
                 author_type, text_content, media_json, link_url, link_title,
                 link_description, link_image, link_site_name, view_count, like_count,
                 comment_count, share_count, save_count, engagement_rate, last_comment_at,
                 deleted_at, published_at, created_at, updated_at, event_id, event_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            ON CONFLICT (post_id) DO UPDATE
            SET post_type = EXCLUDED.post_type,
                author_user_id = EXCLUDED.author_user_id,
                author_display_name = EXCLUDED.author_display_name,
                author_avatar = EXCLUDED.author_avatar,
                author_type = EXCLUDED.author_type,
                text_content = EXCLUDED.text_content,
                media_json = EXCLUDED.media_json,
                link_url = EXCLUDED.link_url,
                link_title = EXCLUDED.link_title,
                link_description = EXCLUDED.link_description,
                link_image = EXCLUDED.link_image,
                link_site_name = EXCLUDED.link_site_name,
                view_count = EXCLUDED.view_count,
                like_count = EXCLUDED.like_count,
                comment_count = EXCLUDED.comment_count,
                share_count = EXCLUDED.share_count,
                save_count = EXCLUDED.save_count,
                engagement_rate = EXCLUDED.engagement_rate,
                last_comment_at = EXCLUDED.last_comment_at,
                deleted_at = EXCLUDED.deleted_at,
                published_at = EXCLUDED.published_at,
                updated_at = EXCLUDED.updated_at,
                event_id = EXCLUDED.event_id,
                event_timestamp = EXCLUDED.event_timestamp
            WHERE posts.event_timestamp IS NULL
               OR posts.event_timestamp <= EXCLUDED.event_timestamp
            RETURNING post_id
            ",
        )
        .bind(&row.post_id)
        .bind(&row.post_type)
        .bind(&row.author_user_id)
        .bind(&row.author_display_name)
        .bind(&row.author_avatar)
        .bind(&row.author_type)
        .bind(&row.text_content)
        .bind(&row.media_json)
        .bind(&row.link_url)
        .bind(&row.link_title)
        .bind(&row.link_description)
        .bind(&row.link_image)
        .bind(&row.link_site_name)
        .bind(row.view_count)
        .bind(row.like_count)
        .bind(row.comment_count)
        .bind(row.share_count)
        .bind(row.save_count)
        .bind(row.engagement_rate)
        .bind(row.last_comment_at)
        .bind(row.deleted_at)
        .bind(row.published_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(audit.event_id)
        .bind(audit.event_timestamp)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to upsert post", &e))?
        .is_some();

        Ok(if applied {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Skipped
        })
    }

    /// Mark a post deleted, keeping the first deletion time.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the update fails.
    pub async fn soft_delete(&self, post_id: &str, audit: EventAudit) -> Result<ApplyOutcome> {
        let result = sqlx::query(
            r"
            UPDATE posts
            SET deleted_at = COALESCE(deleted_at, now()),
                event_id = $2,
                event_timestamp = $3
            WHERE post_id = $1
              AND (event_timestamp IS NULL OR event_timestamp <= $3)
            ",
        )
        .bind(post_id)
        .bind(audit.event_id)
        .bind(audit.event_timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("Failed to soft-delete post", &e))?;

        Ok(if result.rows_affected() > 0 {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Skipped
        })
    }

    /// Load one post, deleted or not.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn get(&self, post_id: &str) -> Result<Option<PostRow>> {
        sqlx::query_as::<_, PostRow>(
            "SELECT post_id, post_type, author_user_id, author_display_name, author_avatar,
                    author_type, text_content, media_json, link_url, link_title,
                    link_description, link_image, link_site_name, view_count, like_count,
                    comment_count, share_count, save_count, engagement_rate, last_comment_at,
                    deleted_at, published_at, created_at, updated_at
             FROM posts
             WHERE post_id = $1",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to query post", &e))
    }

    /// Audit columns of one post.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn audit(&self, post_id: &str) -> Result<Option<StoredAudit>> {
        payload::read_audit(&self.pool, "posts", "post_id", post_id).await
    }
}

impl Projection for PostProjection {
    fn name(&self) -> &str {
        "posts"
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
                Some(EventType::PostCreated | EventType::PostUpdated | EventType::PostPublished) => {
                    let row = PostRow::from_envelope(envelope)?;
                    self.upsert(&row, envelope.audit()).await?
                }
                Some(EventType::PostDeleted) => {
                    let post_id = deleted_post_id(envelope)?;
                    self.soft_delete(&post_id, envelope.audit()).await?
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
                post_id = %envelope.entity_id,
                outcome = outcome.as_str(),
                "Post projection updated"
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
    fn flattens_author_link_and_stats() {
        let envelope = Envelope::new(
            EventType::PostPublished,
            "p1",
            json!({
                "post_type": "link",
                "author": {"user_id": "u1", "display_name": "Ann", "author_type": "user"},
                "text_content": "look",
                "media": [{"url": "https://cdn/1.jpg", "type": "image"}],
                "link_preview": {"url": "https://x.io", "title": "X"},
                "stats": {"view_count": 10, "like_count": 2, "engagement_rate": 0.2},
                "published_at": "2024-03-01T09:00:00Z"
            }),
        );

        let row = PostRow::from_envelope(&envelope).unwrap();
        assert_eq!(row.post_id, "p1");
        assert_eq!(row.post_type, "link");
        assert_eq!(row.author_user_id, "u1");
        assert_eq!(row.author_type.as_deref(), Some("user"));
        assert_eq!(
            row.media_json,
            Some(json!([{"url": "https://cdn/1.jpg", "type": "image"}]))
        );
        assert_eq!(row.link_url.as_deref(), Some("https://x.io"));
        assert!(row.link_image.is_none());
        assert_eq!(row.view_count, 10);
        assert_eq!(row.comment_count, 0);
        assert!((row.engagement_rate - 0.2).abs() < f64::EPSILON);
        assert!(row.published_at.is_some());
        assert!(row.last_comment_at.is_none());
    }

    #[test]
    fn empty_media_is_stored_as_null() {
        for data in [json!({}), json!({"media": []}), json!({"media": null})] {
            let envelope = Envelope::new(EventType::PostCreated, "p1", data);
            assert!(PostRow::from_envelope(&envelope).unwrap().media_json.is_none());
        }
    }

    #[test]
    fn delete_target_prefers_payload_post_id() {
        let named = Envelope::new(EventType::PostDeleted, "p1", json!({"post_id": "p2"}));
        assert_eq!(deleted_post_id(&named).unwrap(), "p2");

        let bare = Envelope::new(EventType::PostDeleted, "p1", json!({}));
        assert_eq!(deleted_post_id(&bare).unwrap(), "p1");
    }
}
