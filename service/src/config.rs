//! Service configuration loaded from environment variables.
//!
//! Every variable has a default, so an empty environment yields a config that
//! talks to a local broker and a local `analytics` database. Values that are
//! present but unparsable are rejected rather than silently replaced.

use crate::telemetry::LogFormat;
use relay_core::Topic;
use relay_postgres::PoolConfig;
use relay_runtime::{ConsumerOptions, ErrorPolicy, RetryPolicy};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be used.
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        /// Environment variable name
        var: &'static str,
        /// Offending value
        value: String,
        /// What was expected
        reason: String,
    },
}

/// Bus connection and subscription settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated).
    pub bootstrap_servers: String,
    /// Client id reported to the broker.
    pub client_id: String,
    /// Consumer group.
    pub group_id: String,
    /// `earliest` or `latest`.
    pub auto_offset_reset: String,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "projection-relay".to_string(),
            group_id: "projection-relay".to_string(),
            auto_offset_reset: "earliest".to_string(),
            topics: Topic::all_names(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bus settings
    pub kafka: KafkaConfig,
    /// Poll loop tuning
    pub consumer: ConsumerOptions,
    /// Projection retry backoff
    pub retry: RetryPolicy,
    /// Read store connection
    pub database: PoolConfig,
    /// Log output format
    pub log_format: LogFormat,
    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first unusable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let kafka_defaults = KafkaConfig::default();
        let kafka = KafkaConfig {
            bootstrap_servers: env.string("KAFKA_BOOTSTRAP_SERVERS", kafka_defaults.bootstrap_servers),
            client_id: env.string("KAFKA_CLIENT_ID", kafka_defaults.client_id),
            group_id: env.string("KAFKA_GROUP_ID", kafka_defaults.group_id),
            auto_offset_reset: env.offset_reset("KAFKA_AUTO_OFFSET_RESET")?,
            topics: env.topics("KAFKA_TOPICS")?,
        };

        let consumer = ConsumerOptions {
            poll_timeout: env.millis("CONSUMER_POLL_TIMEOUT_MS", 1000)?,
            commit_interval: env.millis("CONSUMER_COMMIT_INTERVAL_MS", 5000)?,
            error_policy: env.parsed("CONSUMER_ERROR_POLICY", ErrorPolicy::LogAndContinue)?,
        };

        let retry = RetryPolicy::builder()
            .max_retries(env.parsed("RETRY_MAX_RETRIES", 3)?)
            .initial_delay(env.millis("RETRY_INITIAL_DELAY_MS", 100)?)
            .max_delay(env.millis("RETRY_MAX_DELAY_MS", 5000)?)
            .build();

        let db_defaults = PoolConfig::default();
        let database = PoolConfig {
            host: env.string("DATABASE_HOST", db_defaults.host),
            port: env.parsed("DATABASE_PORT", db_defaults.port)?,
            username: env.string("DATABASE_USER", db_defaults.username),
            password: env.string("DATABASE_PASSWORD", db_defaults.password),
            database: env.string("DATABASE_NAME", db_defaults.database),
            pool_size: env.parsed("DATABASE_POOL_SIZE", db_defaults.pool_size)?,
            acquire_timeout: db_defaults.acquire_timeout,
        };
        if database.pool_size == 0 {
            return Err(ConfigError::Invalid {
                var: "DATABASE_POOL_SIZE",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            kafka,
            consumer,
            retry,
            database,
            log_format: env.parsed("LOG_FORMAT", LogFormat::Pretty)?,
            metrics_port: env.optional("METRICS_PORT")?,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank, trimmed.
    fn raw(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, var: &str, default: String) -> String {
        self.raw(var).unwrap_or(default)
    }

    fn optional<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.raw(var)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.optional(var)?.unwrap_or(default))
    }

    fn millis(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parsed(var, default).map(Duration::from_millis)
    }

    fn offset_reset(&self, var: &'static str) -> Result<String, ConfigError> {
        match self.raw(var) {
            None => Ok("earliest".to_string()),
            Some(value) if value == "earliest" || value == "latest" => Ok(value),
            Some(value) => Err(ConfigError::Invalid {
                var,
                value,
                reason: "expected earliest or latest".to_string(),
            }),
        }
    }

    fn topics(&self, var: &'static str) -> Result<Vec<String>, ConfigError> {
        let Some(value) = self.raw(var) else {
            return Ok(Topic::all_names());
        };

        let mut topics = Vec::new();
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if Topic::parse(name).is_none() {
                return Err(ConfigError::Invalid {
                    var,
                    value: value.clone(),
                    reason: format!("unknown topic '{name}'"),
                });
            }
            if !topics.iter().any(|t| t == name) {
                topics.push(name.to_string());
            }
        }

        if topics.is_empty() {
            return Err(ConfigError::Invalid {
                var,
                value,
                reason: "no topics listed".to_string(),
            });
        }
        Ok(topics)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_yields_local_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.kafka, KafkaConfig::default());
        assert_eq!(config.kafka.topics.len(), 5);
        assert_eq!(config.consumer, ConsumerOptions::default());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.database, "analytics");
        assert_eq!(config.database.pool_size, 5);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.metrics_port, None);
    }

    #[test]
    fn variables_override_defaults() {
        let config = load(&[
            ("KAFKA_BOOTSTRAP_SERVERS", "b1:9092,b2:9092"),
            ("KAFKA_GROUP_ID", "analytics"),
            ("KAFKA_AUTO_OFFSET_RESET", "latest"),
            ("KAFKA_TOPICS", "user, order,user"),
            ("CONSUMER_POLL_TIMEOUT_MS", "250"),
            ("CONSUMER_COMMIT_INTERVAL_MS", "10000"),
            ("CONSUMER_ERROR_POLICY", "halt"),
            ("RETRY_MAX_RETRIES", "5"),
            ("RETRY_INITIAL_DELAY_MS", "50"),
            ("DATABASE_PORT", "15432"),
            ("DATABASE_POOL_SIZE", "2"),
            ("LOG_FORMAT", "json"),
            ("METRICS_PORT", "9090"),
        ])
        .unwrap();

        assert_eq!(config.kafka.bootstrap_servers, "b1:9092,b2:9092");
        assert_eq!(config.kafka.group_id, "analytics");
        assert_eq!(config.kafka.auto_offset_reset, "latest");
        assert_eq!(config.kafka.topics, vec!["user", "order"]);
        assert_eq!(config.consumer.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.consumer.commit_interval, Duration::from_secs(10));
        assert_eq!(config.consumer.error_policy, ErrorPolicy::Halt);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(50));
        assert_eq!(config.retry.max_delay, Duration::from_secs(5));
        assert_eq!(config.database.port, 15432);
        assert_eq!(config.database.pool_size, 2);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.metrics_port, Some(9090));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("KAFKA_GROUP_ID", "   "), ("METRICS_PORT", "")]).unwrap();
        assert_eq!(config.kafka.group_id, "projection-relay");
        assert_eq!(config.metrics_port, None);
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let err = load(&[("CONSUMER_POLL_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "CONSUMER_POLL_TIMEOUT_MS", .. }
        ));

        let err = load(&[("DATABASE_PORT", "70000")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DATABASE_PORT", .. }));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = load(&[("CONSUMER_ERROR_POLICY", "retry_forever")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "CONSUMER_ERROR_POLICY", .. }
        ));
    }

    #[test]
    fn unknown_topics_and_offset_resets_are_rejected() {
        let err = load(&[("KAFKA_TOPICS", "user,invoices")]).unwrap_err();
        assert!(err.to_string().contains("invoices"));

        let err = load(&[("KAFKA_TOPICS", " , ")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "KAFKA_TOPICS", .. }));

        let err = load(&[("KAFKA_AUTO_OFFSET_RESET", "smallest")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "KAFKA_AUTO_OFFSET_RESET", .. }
        ));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let err = load(&[("DATABASE_POOL_SIZE", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DATABASE_POOL_SIZE", .. }));
    }
}
