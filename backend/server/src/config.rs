use std::time::Duration;

use ledger::{
    config::{ConfigError, StoreConfig, try_load, try_load_secs},
    events::{CLICKS_STREAM, QUERIES_STREAM, VIEWS_STREAM},
};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Bucket width when a request names none.
    pub bucket: Duration,
    pub store: StoreConfig,
    pub views_stream: String,
    pub queries_stream: String,
    pub clicks_stream: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            port: try_load("RUST_PORT", "8080")?,
            bucket: try_load_secs("ANALYTICS_BUCKET_SECS", "3600")?,
            store: StoreConfig::load()?,
            views_stream: try_load("VIEWS_STREAM", VIEWS_STREAM)?,
            queries_stream: try_load("QUERIES_STREAM", QUERIES_STREAM)?,
            clicks_stream: try_load("CLICKS_STREAM", CLICKS_STREAM)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bucket: Duration::from_secs(60 * 60),
            store: StoreConfig::default(),
            views_stream: VIEWS_STREAM.to_string(),
            queries_stream: QUERIES_STREAM.to_string(),
            clicks_stream: CLICKS_STREAM.to_string(),
        }
    }
}
