//! Projection behavior against a real `PostgreSQL`.
//!
//! Docker must be running; the tests are ignored by default:
//!
//! ```bash
//! cargo test -p relay-projections -- --ignored
//! ```

#![allow(clippy::expect_used)]

use chrono::{DateTime, Utc};
use relay_core::{ApplyOutcome, Envelope, EventType, Projection};
use relay_postgres::{PoolConfig, init_schema};
use relay_projections::{
    OrderProjection, PostProjection, ProductProjection, SupplierProjection, UserProjection,
};
use serde_json::{Value, json};
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

async fn setup_postgres() -> (ContainerAsync<Postgres>, PgPool) {
    let container = Postgres::default()
        .start()
        .await
        .expect("Failed to start postgres container");

    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get postgres port");

    let config = PoolConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        database: "postgres".to_string(),
        pool_size: 2,
        acquire_timeout: Duration::from_secs(5),
    };

    let mut retries = 0;
    loop {
        if let Ok(pool) = config.connect().await {
            if sqlx::query("SELECT 1").execute(&pool).await.is_ok() {
                init_schema(&pool).await.expect("Failed to bootstrap schema");
                return (container, pool);
            }
        }
        assert!(retries < 60, "Postgres never became ready");
        retries += 1;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn at(ts: &str) -> DateTime<Utc> {
    relay_core::timestamp::parse_lenient(ts).expect("test timestamp")
}

fn envelope(kind: EventType, entity_id: &str, ts: &str, data: Value) -> Envelope {
    let mut envelope = Envelope::new(kind, entity_id, data);
    envelope.timestamp = at(ts);
    envelope
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn user_created_then_deleted_keeps_the_row() {
    let (_container, pool) = setup_postgres().await;
    let users = UserProjection::new(pool);

    let created = envelope(
        EventType::UserCreated,
        "u1",
        "2024-03-01T12:00:00Z",
        json!({
            "contact_info": {"primary_email": "a@b.com"},
            "profile": {"display_name": "Ann"},
            "version": 1
        }),
    );
    assert_eq!(users.apply(&created).await.expect("create"), ApplyOutcome::Applied);

    let row = users.get("u1").await.expect("get").expect("row exists");
    assert_eq!(row.email, "a@b.com");
    assert_eq!(row.display_name, "Ann");
    assert!(row.deleted_at.is_none());

    let deleted = envelope(EventType::UserDeleted, "u1", "2024-03-01T12:05:00Z", json!({}));
    assert_eq!(users.apply(&deleted).await.expect("delete"), ApplyOutcome::Applied);

    let after = users.get("u1").await.expect("get").expect("row retained");
    assert!(after.deleted_at.is_some());
    assert_eq!(after.email, row.email);
    assert_eq!(after.display_name, row.display_name);
    assert_eq!(after.created_at, row.created_at);

    let audit = users.audit("u1").await.expect("audit").expect("row exists");
    assert_eq!(audit.event_id, Some(deleted.event_id));
    assert_eq!(audit.event_timestamp, Some(deleted.timestamp));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn applying_the_same_envelope_twice_is_idempotent() {
    let (_container, pool) = setup_postgres().await;
    let users = UserProjection::new(pool);

    let created = envelope(
        EventType::UserCreated,
        "u1",
        "2024-03-01T12:00:00Z",
        json!({"contact_info": {"primary_email": "a@b.com"}, "version": 2}),
    );

    users.apply(&created).await.expect("first");
    let first = users.get("u1").await.expect("get");
    assert_eq!(users.apply(&created).await.expect("second"), ApplyOutcome::Applied);
    let second = users.get("u1").await.expect("get");

    assert_eq!(first, second);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn stale_redelivery_leaves_the_newer_state() {
    let (_container, pool) = setup_postgres().await;
    let users = UserProjection::new(pool);

    let older = envelope(
        EventType::UserUpdated,
        "u1",
        "2024-03-01T12:00:00Z",
        json!({"profile": {"display_name": "Old"}}),
    );
    let newer = envelope(
        EventType::UserUpdated,
        "u1",
        "2024-03-01T13:00:00Z",
        json!({"profile": {"display_name": "New"}}),
    );

    assert_eq!(users.apply(&newer).await.expect("newer"), ApplyOutcome::Applied);
    assert_eq!(users.apply(&older).await.expect("older"), ApplyOutcome::Skipped);

    let row = users.get("u1").await.expect("get").expect("row exists");
    assert_eq!(row.display_name, "New");

    let audit = users.audit("u1").await.expect("audit").expect("row exists");
    assert_eq!(audit.event_id, Some(newer.event_id));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn variants_are_replaced_not_merged() {
    let (_container, pool) = setup_postgres().await;
    let products = ProductProjection::new(pool);

    let variant = |id: &str| json!({"variant_id": id, "variant_name": id, "price_cents": 100});

    let first = envelope(
        EventType::ProductCreated,
        "p1",
        "2024-03-01T12:00:00Z",
        json!({"supplier_id": "s1", "name": "Widget", "variants": {"A": variant("a"), "B": variant("b")}}),
    );
    let second = envelope(
        EventType::ProductUpdated,
        "p1",
        "2024-03-01T12:01:00Z",
        json!({"supplier_id": "s1", "name": "Widget", "variants": {"B": variant("b2"), "C": variant("c")}}),
    );

    products.apply(&first).await.expect("create");
    products.apply(&second).await.expect("update");

    let variants = products.variants("p1").await.expect("variants");
    let keys: Vec<&str> = variants.iter().map(|v| v.variant_key.as_str()).collect();
    assert_eq!(keys, vec!["B", "C"]);
    assert_eq!(variants[0].variant_id, "b2");

    // A document without a variants field keeps the stored set.
    let lifecycle = envelope(
        EventType::ProductDiscontinued,
        "p1",
        "2024-03-01T12:02:00Z",
        json!({"supplier_id": "s1", "name": "Widget", "status": "discontinued"}),
    );
    products.apply(&lifecycle).await.expect("discontinue");
    assert_eq!(products.variants("p1").await.expect("variants").len(), 2);
    let row = products.get("p1").await.expect("get").expect("row exists");
    assert_eq!(row.status, "discontinued");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn stale_product_does_not_touch_variants() {
    let (_container, pool) = setup_postgres().await;
    let products = ProductProjection::new(pool);

    let newer = envelope(
        EventType::ProductUpdated,
        "p1",
        "2024-03-01T13:00:00Z",
        json!({"name": "New", "variants": {"A": {"variant_id": "a"}}}),
    );
    let older = envelope(
        EventType::ProductCreated,
        "p1",
        "2024-03-01T12:00:00Z",
        json!({"name": "Old", "variants": {}}),
    );

    products.apply(&newer).await.expect("newer");
    assert_eq!(products.apply(&older).await.expect("older"), ApplyOutcome::Skipped);

    assert_eq!(products.variants("p1").await.expect("variants").len(), 1);
    let row = products.get("p1").await.expect("get").expect("row exists");
    assert_eq!(row.name, "New");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn product_delete_removes_row_and_variants() {
    let (_container, pool) = setup_postgres().await;
    let products = ProductProjection::new(pool.clone());

    let created = envelope(
        EventType::ProductCreated,
        "p1",
        "2024-03-01T12:00:00Z",
        json!({"name": "Widget", "variants": {"A": {"variant_id": "a"}}}),
    );
    products.apply(&created).await.expect("create");

    let deleted = envelope(EventType::ProductDeleted, "p1", "2024-03-01T12:10:00Z", json!({}));
    assert_eq!(products.apply(&deleted).await.expect("delete"), ApplyOutcome::Applied);

    assert!(products.get("p1").await.expect("get").is_none());
    let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_variants")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(orphans, 0);

    // Deleting again finds nothing to delete.
    assert_eq!(products.apply(&deleted).await.expect("redelete"), ApplyOutcome::Skipped);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn supplier_delete_is_hard() {
    let (_container, pool) = setup_postgres().await;
    let suppliers = SupplierProjection::new(pool);

    let created = envelope(
        EventType::SupplierCreated,
        "s1",
        "2024-03-01T12:00:00Z",
        json!({"company_info": {"legal_name": "Acme Ltd"}}),
    );
    suppliers.apply(&created).await.expect("create");
    assert!(suppliers.get("s1").await.expect("get").is_some());

    let deleted = envelope(EventType::SupplierDeleted, "s1", "2024-03-01T12:01:00Z", json!({}));
    suppliers.apply(&deleted).await.expect("delete");
    assert!(suppliers.get("s1").await.expect("get").is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn cancellation_resolves_by_order_number_and_touches_status_only() {
    let (_container, pool) = setup_postgres().await;
    let orders = OrderProjection::new(pool);

    let created = envelope(
        EventType::OrderCreated,
        "o1",
        "2024-03-01T12:00:00Z",
        json!({
            "order_number": "ORD-0001",
            "customer": {"user_id": "u1", "email": "a@b.com"},
            "items": [
                {"item_id": "i1", "product_snapshot": {"product_id": "p1", "supplier_id": "s1"}, "quantity": 1},
                {"item_id": "i2", "product_snapshot": {"product_id": "p2", "supplier_id": "s1"}, "quantity": 3}
            ],
            "status": "pending"
        }),
    );
    orders.apply(&created).await.expect("create");
    let before = orders.get("o1").await.expect("get").expect("row exists");

    let cancelled = envelope(
        EventType::OrderCancelled,
        "o1",
        "2024-03-01T12:30:00Z",
        json!({"order_number": "ORD-0001"}),
    );
    assert_eq!(orders.apply(&cancelled).await.expect("cancel"), ApplyOutcome::Applied);

    let after = orders.get("o1").await.expect("get").expect("row exists");
    assert_eq!(after.status, "cancelled");
    assert_eq!(after.customer_email, before.customer_email);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(orders.items("o1").await.expect("items").len(), 2);

    let audit = orders.audit("o1").await.expect("audit").expect("row exists");
    assert_eq!(audit.event_id, Some(cancelled.event_id));

    let unknown = envelope(
        EventType::OrderCancelled,
        "o9",
        "2024-03-01T12:40:00Z",
        json!({"order_number": "ORD-9999"}),
    );
    assert_eq!(orders.apply(&unknown).await.expect("unknown"), ApplyOutcome::Skipped);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn product_lifecycle_never_regresses_status() {
    let (_container, pool) = setup_postgres().await;
    let products = ProductProjection::new(pool);

    let product = |kind, ts, status| {
        envelope(
            kind,
            "p1",
            ts,
            json!({"supplier_id": "s1", "name": "Widget", "status": status}),
        )
    };
    let created = product(EventType::ProductCreated, "2024-03-01T12:00:00Z", "draft");
    let steps = [
        created.clone(),
        product(EventType::ProductPublished, "2024-03-01T12:01:00Z", "active"),
        product(EventType::ProductOutOfStock, "2024-03-01T12:02:00Z", "out_of_stock"),
    ];
    for step in &steps {
        assert_eq!(products.apply(step).await.expect("apply"), ApplyOutcome::Applied);
    }

    let row = products.get("p1").await.expect("get").expect("row exists");
    assert_eq!(row.status, "out_of_stock");

    assert_eq!(products.apply(&created).await.expect("redeliver"), ApplyOutcome::Skipped);
    let row = products.get("p1").await.expect("get").expect("row exists");
    assert_eq!(row.status, "out_of_stock");
    let audit = products.audit("p1").await.expect("audit").expect("row exists");
    assert_eq!(audit.event_id, Some(steps[2].event_id));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn order_lifecycle_never_regresses_status() {
    let (_container, pool) = setup_postgres().await;
    let orders = OrderProjection::new(pool);

    let order = |ts, status| {
        envelope(
            EventType::OrderCreated,
            "o1",
            ts,
            json!({
                "order_number": "ORD-0001",
                "customer": {"user_id": "u1", "email": "a@b.com"},
                "items": [
                    {"item_id": "i1", "product_snapshot": {"product_id": "p1", "supplier_id": "s1"}, "quantity": 1}
                ],
                "status": status
            }),
        )
    };
    let pending = order("2024-03-01T12:00:00Z", "pending");
    let confirmed = order("2024-03-01T12:05:00Z", "confirmed");

    assert_eq!(orders.apply(&pending).await.expect("create"), ApplyOutcome::Applied);
    assert_eq!(orders.apply(&confirmed).await.expect("confirm"), ApplyOutcome::Applied);
    let row = orders.get("o1").await.expect("get").expect("row exists");
    assert_eq!(row.status, "confirmed");

    assert_eq!(orders.apply(&pending).await.expect("redeliver"), ApplyOutcome::Skipped);
    let row = orders.get("o1").await.expect("get").expect("row exists");
    assert_eq!(row.status, "confirmed");

    let cancelled = envelope(
        EventType::OrderCancelled,
        "o1",
        "2024-03-01T12:10:00Z",
        json!({"order_number": "ORD-0001"}),
    );
    assert_eq!(orders.apply(&cancelled).await.expect("cancel"), ApplyOutcome::Applied);
    assert_eq!(orders.apply(&confirmed).await.expect("redeliver"), ApplyOutcome::Skipped);
    let row = orders.get("o1").await.expect("get").expect("row exists");
    assert_eq!(row.status, "cancelled");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn post_lifecycle_ends_soft_deleted() {
    let (_container, pool) = setup_postgres().await;
    let posts = PostProjection::new(pool);

    let steps = [
        (EventType::PostCreated, "2024-03-01T12:00:00Z", "draft"),
        (EventType::PostUpdated, "2024-03-01T12:01:00Z", "draft"),
        (EventType::PostPublished, "2024-03-01T12:02:00Z", "published"),
    ];

    for (kind, ts, post_type) in steps {
        let step = envelope(
            kind,
            "post1",
            ts,
            json!({"post_type": post_type, "author": {"user_id": "u1"}}),
        );
        assert_eq!(posts.apply(&step).await.expect("apply"), ApplyOutcome::Applied);
    }

    let row = posts.get("post1").await.expect("get").expect("row exists");
    assert_eq!(row.post_type, "published");

    let deleted = envelope(
        EventType::PostDeleted,
        "post1",
        "2024-03-01T12:03:00Z",
        json!({"post_id": "post1"}),
    );
    posts.apply(&deleted).await.expect("delete");
    let row = posts.get("post1").await.expect("get").expect("row retained");
    assert!(row.deleted_at.is_some());
}
