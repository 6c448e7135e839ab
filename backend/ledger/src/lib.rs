//! # Ledger
//!
//! Shared substrate for the news analytics pipeline: event positions, typed
//! events and the four collaborators every worker and the server talk to.
//!
//! ## Collaborators
//!
//! - [`EventLog`]: append-only streams, readable by position range
//! - [`ConsumerGroups`]: durable, shared read cursors with acknowledgement
//! - [`RankedStore`]: ranked sets and expiring counters
//! - [`AnalyticsIndex`]: one document per search, queried through aggregates
//!
//! Each has an in-memory implementation ([`memory`]) and a Redis one
//! ([`redis`]). Components never reach for a global connection; they are
//! handed a [`Backends`] built once at startup.
use std::sync::Arc;

pub mod analytics;
pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod log;
pub mod memory;
pub mod position;
pub mod redis;
pub mod shutdown;
pub mod store;

pub use analytics::{AnalyticsDocument, AnalyticsIndex};
pub use error::{EventError, LedgerError, Result};
pub use events::{ArticleView, Fields, SearchClick, SearchQuery, TypedEvent};
pub use log::{ConsumerGroups, EventLog, RangeScan, ReadFrom, StreamEntry};
pub use position::{GroupStart, LogPosition};
pub use store::RankedStore;

use self::{
    memory::{MemoryIndex, MemoryLog, MemoryStore},
    redis::{RedisIndex, RedisLog, RedisOptions, RedisStore, connect},
};

/// Handles to every collaborator, cloned into each component.
#[derive(Clone)]
pub struct Backends {
    pub log: Arc<dyn EventLog>,
    pub groups: Arc<dyn ConsumerGroups>,
    pub store: Arc<dyn RankedStore>,
    pub index: Arc<dyn AnalyticsIndex>,
}

impl Backends {
    pub fn memory() -> Self {
        let log = Arc::new(MemoryLog::new());

        Self {
            log: log.clone(),
            groups: log,
            store: Arc::new(MemoryStore::new()),
            index: Arc::new(MemoryIndex::new()),
        }
    }

    /// Connects to Redis. Group reads get a dedicated connection whose
    /// response timeout covers `max_block` on top of the usual one.
    pub async fn redis(
        redis_url: &str,
        options: &RedisOptions,
        max_block: std::time::Duration,
    ) -> Result<Self> {
        let connection = connect(redis_url, options).await?;

        let blocking_options = RedisOptions {
            response_timeout: options.response_timeout + max_block,
            ..options.clone()
        };
        let blocking = connect(redis_url, &blocking_options).await?;

        let log = Arc::new(RedisLog::new(connection.clone(), blocking));

        Ok(Self {
            log: log.clone(),
            groups: log,
            store: Arc::new(RedisStore::new(connection.clone())),
            index: Arc::new(RedisIndex::new(connection)),
        })
    }
}
