//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::orchestrator::TransferSettings;
use crate::outbox::OutboxRelayConfig;
use crate::publisher::{Channels, DEFAULT_DEPOSIT_TOPIC, DEFAULT_WITHDRAW_TOPIC};
use crate::verification::{UnexpectedStatusPolicy, DEFAULT_VERIFICATION_URL};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub log_format: LogFormat,

    /// Channel names for withdrawal and deposit events
    pub channels: Channels,

    /// Remote verification endpoint
    pub verification_url: String,

    pub verification_timeout: Duration,

    /// Handling of verification statuses other than 200 and 503
    pub unexpected_status_policy: UnexpectedStatusPolicy,

    /// External broker base URL; the in-memory broker is used when unset
    pub broker_url: Option<String>,

    pub outbox_relay_interval: Duration,

    pub outbox_batch_size: i64,

    /// Failed deliveries before an outbox message is dead-lettered
    pub outbox_max_attempts: i32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_source<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = or_default("DATABASE_MAX_CONNECTIONS", "10")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = or_default("HOST", "127.0.0.1");

        let port = or_default("PORT", "3000")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let environment = or_default("ENVIRONMENT", "development");

        let log_format = or_default("LOG_FORMAT", "text")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("LOG_FORMAT"))?;

        let channels = Channels {
            withdrawal: or_default("WITHDRAW_MONEY_TOPIC", DEFAULT_WITHDRAW_TOPIC),
            deposit: or_default("DEPOSIT_MONEY_TOPIC", DEFAULT_DEPOSIT_TOPIC),
        };
        if channels.withdrawal.trim().is_empty() {
            return Err(ConfigError::InvalidValue("WITHDRAW_MONEY_TOPIC"));
        }
        if channels.deposit.trim().is_empty() {
            return Err(ConfigError::InvalidValue("DEPOSIT_MONEY_TOPIC"));
        }

        let verification_url = or_default("VERIFICATION_URL", DEFAULT_VERIFICATION_URL);

        let verification_timeout = or_default("VERIFICATION_TIMEOUT_MS", "5000")
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .ok_or(ConfigError::InvalidValue("VERIFICATION_TIMEOUT_MS"))?;

        let unexpected_status_policy = or_default("UNEXPECTED_STATUS_POLICY", "rollback")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("UNEXPECTED_STATUS_POLICY"))?;

        let broker_url = get("BROKER_URL").filter(|url| !url.trim().is_empty());

        let outbox_relay_interval = or_default("OUTBOX_RELAY_INTERVAL_MS", "1000")
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .ok_or(ConfigError::InvalidValue("OUTBOX_RELAY_INTERVAL_MS"))?;

        let outbox_batch_size = or_default("OUTBOX_BATCH_SIZE", "100")
            .parse::<i64>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or(ConfigError::InvalidValue("OUTBOX_BATCH_SIZE"))?;

        let outbox_max_attempts = or_default("OUTBOX_MAX_ATTEMPTS", "10")
            .parse::<i32>()
            .ok()
            .filter(|attempts| *attempts > 0)
            .ok_or(ConfigError::InvalidValue("OUTBOX_MAX_ATTEMPTS"))?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            log_format,
            channels,
            verification_url,
            verification_timeout,
            unexpected_status_policy,
            broker_url,
            outbox_relay_interval,
            outbox_batch_size,
            outbox_max_attempts,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            channels: self.channels.clone(),
            verification_url: self.verification_url.clone(),
            verification_timeout: self.verification_timeout,
            unexpected_status: self.unexpected_status_policy,
        }
    }

    pub fn relay_config(&self) -> OutboxRelayConfig {
        OutboxRelayConfig {
            batch_size: self.outbox_batch_size,
            interval: self.outbox_relay_interval,
            max_attempts: self.outbox_max_attempts,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
