use std::time::Duration;

use ledger::{
    config::{ConfigError, StoreConfig, try_load, try_load_millis, try_load_secs},
    events::{CLICKS_STREAM, QUERIES_STREAM, VIEWS_STREAM},
};

use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub store: StoreConfig,
    pub views_stream: String,
    pub queries_stream: String,
    pub clicks_stream: String,
    pub recently_viewed_group: String,
    pub search_analytics_group: String,
    /// Entries requested per group read.
    pub batch: usize,
    /// Longest a read waits for new entries.
    pub block: Duration,
    /// Entries left pending this long by another consumer are taken over.
    /// `None` disables claiming.
    pub claim_idle: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let claim_idle = try_load_secs("WORKER_CLAIM_IDLE_SECS", "300")?;

        Ok(Self {
            store: StoreConfig::load()?,
            views_stream: try_load("VIEWS_STREAM", VIEWS_STREAM)?,
            queries_stream: try_load("QUERIES_STREAM", QUERIES_STREAM)?,
            clicks_stream: try_load("CLICKS_STREAM", CLICKS_STREAM)?,
            recently_viewed_group: try_load("RECENTLY_VIEWED_GROUP", "recently_viewed")?,
            search_analytics_group: try_load("SEARCH_ANALYTICS_GROUP", "search_analytics")?,
            batch: try_load::<usize>("WORKER_BATCH", "10")?.max(1),
            block: try_load_millis("WORKER_BLOCK_MS", "2000")?,
            claim_idle: (!claim_idle.is_zero()).then_some(claim_idle),
            retry: RetryPolicy {
                initial: try_load_millis("RETRY_INITIAL_MS", "100")?,
                max: try_load_millis("RETRY_MAX_MS", "30000")?,
                factor: 2,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            views_stream: VIEWS_STREAM.to_string(),
            queries_stream: QUERIES_STREAM.to_string(),
            clicks_stream: CLICKS_STREAM.to_string(),
            recently_viewed_group: "recently_viewed".to_string(),
            search_analytics_group: "search_analytics".to_string(),
            batch: 10,
            block: Duration::from_millis(2000),
            claim_idle: Some(Duration::from_secs(300)),
            retry: RetryPolicy::default(),
        }
    }
}
