//! Read-store schema bootstrap.
//!
//! Every statement is idempotent (`IF NOT EXISTS`), so [`init_schema`] runs
//! unconditionally at startup.

use crate::StoreError;
use sqlx::PgPool;

/// Projection tables, child tables and indexes, in dependency order.
pub const PROJECTION_TABLES: &[&str] = &[
    // users
    r"
    CREATE TABLE IF NOT EXISTS users (
        user_id         TEXT PRIMARY KEY,
        email           TEXT NOT NULL,
        phone           TEXT,
        display_name    TEXT NOT NULL,
        avatar          TEXT,
        bio             TEXT,
        version         BIGINT NOT NULL DEFAULT 1,
        deleted_at      TIMESTAMPTZ,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        event_id        UUID,
        event_timestamp TIMESTAMPTZ
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)",
    "CREATE INDEX IF NOT EXISTS idx_users_created ON users(created_at)",
    // suppliers
    r"
    CREATE TABLE IF NOT EXISTS suppliers (
        supplier_id          TEXT PRIMARY KEY,
        email                TEXT NOT NULL,
        primary_phone        TEXT NOT NULL,
        contact_person_name  TEXT,
        contact_person_title TEXT,
        contact_person_email TEXT,
        contact_person_phone TEXT,
        legal_name           TEXT NOT NULL,
        dba_name             TEXT,
        street_address_1     TEXT,
        street_address_2     TEXT,
        city                 TEXT,
        state                TEXT,
        zip_code             TEXT,
        country              TEXT,
        support_email        TEXT,
        support_phone        TEXT,
        facebook_url         TEXT,
        instagram_handle     TEXT,
        twitter_handle       TEXT,
        linkedin_url         TEXT,
        timezone             TEXT,
        created_at           TIMESTAMPTZ NOT NULL,
        updated_at           TIMESTAMPTZ NOT NULL,
        event_id             UUID,
        event_timestamp      TIMESTAMPTZ
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_suppliers_email ON suppliers(email)",
    "CREATE INDEX IF NOT EXISTS idx_suppliers_legal_name ON suppliers(legal_name)",
    "CREATE INDEX IF NOT EXISTS idx_suppliers_location ON suppliers(country, state, city)",
    // products
    r"
    CREATE TABLE IF NOT EXISTS products (
        product_id        TEXT PRIMARY KEY,
        supplier_id       TEXT NOT NULL,
        supplier_name     TEXT,
        name              TEXT NOT NULL,
        short_description TEXT,
        category          TEXT NOT NULL,
        unit_type         TEXT NOT NULL,
        base_sku          TEXT,
        brand             TEXT,
        base_price_cents  BIGINT NOT NULL,
        status            TEXT NOT NULL,
        view_count        BIGINT NOT NULL DEFAULT 0,
        favorite_count    BIGINT NOT NULL DEFAULT 0,
        purchase_count    BIGINT NOT NULL DEFAULT 0,
        total_reviews     BIGINT NOT NULL DEFAULT 0,
        published_at      TIMESTAMPTZ,
        created_at        TIMESTAMPTZ NOT NULL,
        updated_at        TIMESTAMPTZ NOT NULL,
        event_id          UUID,
        event_timestamp   TIMESTAMPTZ
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_products_supplier ON products(supplier_id)",
    "CREATE INDEX IF NOT EXISTS idx_products_category ON products(category)",
    "CREATE INDEX IF NOT EXISTS idx_products_status ON products(status)",
    "CREATE INDEX IF NOT EXISTS idx_products_created ON products(created_at)",
    // product_variants
    r"
    CREATE TABLE IF NOT EXISTS product_variants (
        id              BIGSERIAL PRIMARY KEY,
        product_id      TEXT NOT NULL REFERENCES products(product_id) ON DELETE CASCADE,
        variant_key     TEXT NOT NULL,
        variant_id      TEXT NOT NULL,
        variant_name    TEXT NOT NULL,
        attributes_json JSONB,
        price_cents     BIGINT NOT NULL,
        cost_cents      BIGINT,
        quantity        BIGINT NOT NULL DEFAULT 0,
        width_cm        DOUBLE PRECISION,
        height_cm       DOUBLE PRECISION,
        depth_cm        DOUBLE PRECISION,
        image_url       TEXT,
        CONSTRAINT uq_product_variant UNIQUE (product_id, variant_key)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_variants_product ON product_variants(product_id)",
    // orders
    r"
    CREATE TABLE IF NOT EXISTS orders (
        order_id                TEXT PRIMARY KEY,
        order_number            TEXT NOT NULL,
        customer_user_id        TEXT NOT NULL,
        customer_display_name   TEXT,
        customer_email          TEXT,
        customer_phone          TEXT,
        shipping_recipient_name TEXT,
        shipping_phone          TEXT,
        shipping_street_1       TEXT,
        shipping_street_2       TEXT,
        shipping_city           TEXT,
        shipping_state          TEXT,
        shipping_zip_code       TEXT,
        shipping_country        TEXT,
        status                  TEXT NOT NULL,
        created_at              TIMESTAMPTZ NOT NULL,
        updated_at              TIMESTAMPTZ NOT NULL,
        event_id                UUID,
        event_timestamp         TIMESTAMPTZ,
        CONSTRAINT uq_order_number UNIQUE (order_number)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_user_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
    "CREATE INDEX IF NOT EXISTS idx_orders_created ON orders(created_at)",
    // order_items
    r"
    CREATE TABLE IF NOT EXISTS order_items (
        id                      BIGSERIAL PRIMARY KEY,
        order_id                TEXT NOT NULL REFERENCES orders(order_id) ON DELETE CASCADE,
        item_id                 TEXT NOT NULL,
        product_id              TEXT NOT NULL,
        supplier_id             TEXT NOT NULL,
        product_name            TEXT,
        variant_name            TEXT,
        variant_attributes_json JSONB,
        image_url               TEXT,
        supplier_name           TEXT,
        quantity                BIGINT NOT NULL,
        unit_price_cents        BIGINT NOT NULL,
        final_price_cents       BIGINT NOT NULL,
        total_cents             BIGINT NOT NULL,
        fulfillment_status      TEXT,
        shipped_quantity        BIGINT NOT NULL DEFAULT 0,
        tracking_number         TEXT,
        carrier                 TEXT,
        shipped_at              TIMESTAMPTZ,
        delivered_at            TIMESTAMPTZ,
        CONSTRAINT uq_order_item UNIQUE (order_id, item_id)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_items_order ON order_items(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_items_product ON order_items(product_id)",
    // posts
    r"
    CREATE TABLE IF NOT EXISTS posts (
        post_id             TEXT PRIMARY KEY,
        post_type           TEXT NOT NULL,
        author_user_id      TEXT NOT NULL,
        author_display_name TEXT,
        author_avatar       TEXT,
        author_type         TEXT,
        text_content        TEXT,
        media_json          JSONB,
        link_url            TEXT,
        link_title          TEXT,
        link_description    TEXT,
        link_image          TEXT,
        link_site_name      TEXT,
        view_count          BIGINT NOT NULL DEFAULT 0,
        like_count          BIGINT NOT NULL DEFAULT 0,
        comment_count       BIGINT NOT NULL DEFAULT 0,
        share_count         BIGINT NOT NULL DEFAULT 0,
        save_count          BIGINT NOT NULL DEFAULT 0,
        engagement_rate     DOUBLE PRECISION NOT NULL DEFAULT 0,
        last_comment_at     TIMESTAMPTZ,
        deleted_at          TIMESTAMPTZ,
        published_at        TIMESTAMPTZ,
        created_at          TIMESTAMPTZ NOT NULL,
        updated_at          TIMESTAMPTZ NOT NULL,
        event_id            UUID,
        event_timestamp     TIMESTAMPTZ
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_user_id)",
    "CREATE INDEX IF NOT EXISTS idx_posts_type ON posts(post_type)",
    "CREATE INDEX IF NOT EXISTS idx_posts_published ON posts(published_at)",
    "CREATE INDEX IF NOT EXISTS idx_posts_created ON posts(created_at)",
];

/// Dead-letter quarantine table.
pub const DEAD_LETTER_TABLES: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS failed_events (
        id               BIGSERIAL PRIMARY KEY,
        topic            TEXT NOT NULL,
        partition_id     INTEGER NOT NULL,
        message_offset   BIGINT NOT NULL,
        message_key      TEXT,
        payload          BYTEA NOT NULL,
        event_id         UUID,
        event_type       TEXT,
        entity_id        TEXT,
        error_message    TEXT NOT NULL,
        retry_count      INTEGER NOT NULL DEFAULT 0,
        first_failed_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_failed_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
        status           TEXT NOT NULL DEFAULT 'pending',
        resolved_at      TIMESTAMPTZ,
        resolved_by      TEXT,
        resolution_notes TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_failed_events_status ON failed_events(status, first_failed_at)",
    "CREATE INDEX IF NOT EXISTS idx_failed_events_entity ON failed_events(entity_id)",
];

/// Create every table and index the relay writes to.
///
/// Runs all statements on a single connection; safe to call repeatedly.
///
/// # Errors
///
/// Returns [`StoreError::Schema`] naming the first statement that failed.
pub async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    for statement in PROJECTION_TABLES.iter().chain(DEAD_LETTER_TABLES) {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Schema {
                statement: summarize(statement),
                reason: e.to_string(),
            })?;
    }

    tracing::info!(
        statements = PROJECTION_TABLES.len() + DEAD_LETTER_TABLES.len(),
        "Read-store schema ready"
    );
    Ok(())
}

/// First line of a statement, for error messages.
fn summarize(statement: &str) -> String {
    statement
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .trim_end_matches('(')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_statement_is_rerunnable() {
        for statement in PROJECTION_TABLES.iter().chain(DEAD_LETTER_TABLES) {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "not idempotent: {}",
                summarize(statement)
            );
        }
    }

    #[test]
    fn children_follow_their_parents() {
        let position = |needle: &str| {
            PROJECTION_TABLES
                .iter()
                .position(|s| s.contains(needle))
                .unwrap_or(usize::MAX)
        };
        assert!(position("TABLE IF NOT EXISTS products") < position("TABLE IF NOT EXISTS product_variants"));
        assert!(position("TABLE IF NOT EXISTS orders") < position("TABLE IF NOT EXISTS order_items"));
    }

    #[test]
    fn summary_is_the_first_line() {
        assert_eq!(
            summarize(PROJECTION_TABLES[0]),
            "CREATE TABLE IF NOT EXISTS users"
        );
    }
}
