//! Fixed-size connection pool for the read store.

use crate::StoreError;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::time::Duration;

/// Connection settings for the read store.
#[derive(Clone)]
pub struct PoolConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login role.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Database name.
    pub database: String,
    /// Number of pooled connections, kept open for the pool's lifetime.
    pub pool_size: u32,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "analytics".to_string(),
            password: "analytics".to_string(),
            database: "analytics".to_string(),
            pool_size: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("pool_size", &self.pool_size)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl PoolConfig {
    /// Connection options without going through a URL, so passwords need no escaping.
    #[must_use]
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
    }

    /// Open the pool with exactly `pool_size` connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the initial connections cannot be
    /// established or `pool_size` is zero.
    pub async fn connect(&self) -> Result<PgPool, StoreError> {
        if self.pool_size == 0 {
            return Err(StoreError::Connection("pool_size must be at least 1".to_string()));
        }

        let pool = PgPoolOptions::new()
            .max_connections(self.pool_size)
            .min_connections(self.pool_size)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(self.connect_options())
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect: {e}")))?;

        tracing::info!(
            host = %self.host,
            port = self.port,
            database = %self.database,
            pool_size = self.pool_size,
            "Read-store pool connected"
        );
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_password() {
        let config = PoolConfig {
            password: "hunter2".to_string(),
            ..PoolConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("analytics"));
    }

    #[tokio::test]
    async fn zero_sized_pool_is_rejected() {
        let config = PoolConfig {
            pool_size: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(config.connect().await, Err(StoreError::Connection(_))));
    }
}
