//! `PostgreSQL` plumbing for the projection relay.
//!
//! - [`PoolConfig`]: fixed-size pool construction
//! - [`init_schema`]: idempotent bootstrap of every projection and quarantine table
//! - [`DeadLetterQueue`]: the `failed_events` quarantine, usable as a
//!   [`DeadLetterSink`](relay_core::DeadLetterSink)
//!
//! # Example
//!
//! ```no_run
//! use relay_postgres::{DeadLetterQueue, PoolConfig, init_schema};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PoolConfig::default().connect().await?;
//! init_schema(&pool).await?;
//! let dlq = DeadLetterQueue::new(pool.clone());
//! println!("pending: {}", dlq.count_pending().await?);
//! # Ok(())
//! # }
//! ```

pub mod dead_letter_queue;
pub mod pool;
pub mod schema;

pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedEvent};
pub use pool::PoolConfig;
pub use schema::init_schema;

use thiserror::Error;

/// Errors from pool construction, schema bootstrap and the dead-letter table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Could not open or borrow a connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A schema statement failed.
    #[error("Schema statement '{statement}' failed: {reason}")]
    Schema {
        /// First line of the failing statement
        statement: String,
        /// Database error
        reason: String,
    },

    /// Any other database error.
    #[error("Database error: {0}")]
    Database(String),
}
