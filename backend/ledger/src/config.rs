use std::{env, fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

use crate::redis::RedisOptions;

#[derive(Error, Debug)]
#[error("Invalid {key} value {value:?}: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Reads `key` from the environment, falling back to `default`.
pub fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError {
            key: key.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        }
    })
}

pub fn try_load_millis(key: &str, default: &str) -> Result<Duration, ConfigError> {
    try_load::<u64>(key, default).map(Duration::from_millis)
}

pub fn try_load_secs(key: &str, default: &str) -> Result<Duration, ConfigError> {
    try_load::<u64>(key, default).map(Duration::from_secs)
}

/// Connection settings shared by every binary.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub redis_url: String,
    pub redis: RedisOptions,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis: RedisOptions::default(),
        }
    }
}

impl StoreConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379")?,
            redis: RedisOptions {
                connection_timeout: try_load_millis("REDIS_CONNECT_TIMEOUT_MS", "1000")?,
                response_timeout: try_load_millis("REDIS_RESPONSE_TIMEOUT_MS", "5000")?,
                retries: try_load("REDIS_RETRIES", "3")?,
            },
        })
    }
}
