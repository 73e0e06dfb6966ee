//! Runtime configuration.
//!
//! Sources, lowest precedence first: built-in defaults, `config/{ENVIRONMENT}.toml`
//! (or `STOCKLEDGER_CONFIG_FILE`), `STOCKLEDGER__SECTION__KEY` environment
//! variables, and `DATABASE_URL`.

use std::env;
use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::retry::{BackoffStrategy, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub database: DatabaseConfig,
    pub writer: WriterConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Attempts per change, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl WriterConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            strategy: BackoffStrategy::Exponential,
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// UTC hour (0-23) after which the daily pass may run.
    pub run_hour_utc: u32,
    pub poll_interval_secs: u64,
    /// Attempts per tenant and day, including the first.
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
}

impl SnapshotConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_secs(self.retry_delay_secs);
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: delay,
            max_delay: delay * 8,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }
}

impl LedgerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .set_default("database.url", "postgres://localhost/stockledger")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("writer.max_attempts", 6)?
            .set_default("writer.base_delay_ms", 10)?
            .set_default("writer.max_delay_ms", 500)?
            .set_default("snapshot.run_hour_utc", 23)?
            .set_default("snapshot.poll_interval_secs", 60)?
            .set_default("snapshot.max_attempts", 3)?
            .set_default("snapshot.retry_delay_secs", 30)?;

        builder = match env::var("STOCKLEDGER_CONFIG_FILE") {
            Ok(path) => builder.add_source(File::with_name(&path).required(false)),
            Err(_) => builder.add_source(File::with_name(&format!("config/{environment}")).required(false)),
        };

        builder = builder.add_source(Environment::with_prefix("STOCKLEDGER").separator("__"));

        if let Ok(url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", url)?;
        }

        let config: LedgerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message("database.url is required".to_string()));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message(
                "database.min_connections exceeds database.max_connections".to_string(),
            ));
        }
        if self.snapshot.run_hour_utc > 23 {
            return Err(ConfigError::Message("snapshot.run_hour_utc must be 0-23".to_string()));
        }
        Ok(())
    }
}
