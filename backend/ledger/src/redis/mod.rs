//! # Redis
//!
//! Production backends.
//!
//! ## Implementation
//!
//! - Event log: Redis Streams (`XADD`, `XRANGE`), one stream per event type
//! - Consumer groups: `XGROUP CREATE ... MKSTREAM`, `XREADGROUP`, `XAUTOCLAIM`, `XACK`
//! - Ranked store: sorted sets and counters, each operation one `MULTI`/`EXEC`
//!   transaction or one Lua script
//! - Analytics index: hashes under `analytics:search:` indexed by RediSearch,
//!   read through `FT.AGGREGATE`
//!
//! Blocking group reads run on their own connection so a parked `XREADGROUP`
//! never queues the writes issued while handling the previous batch.
mod index;
mod log;
mod store;

use std::time::Duration;

use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::info;

pub use index::RedisIndex;
pub use log::RedisLog;
pub use store::RedisStore;

use crate::error::Result;

#[derive(Clone, Debug)]
pub struct RedisOptions {
    pub connection_timeout: Duration,
    pub response_timeout: Duration,
    pub retries: usize,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_millis(1000),
            response_timeout: Duration::from_secs(5),
            retries: 3,
        }
    }
}

/// Opens a managed connection; `rediss://` URLs get TLS.
pub async fn connect(redis_url: &str, options: &RedisOptions) -> Result<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(options.retries)
        .set_connection_timeout(options.connection_timeout)
        .set_response_timeout(options.response_timeout);

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    info!("Connected to Redis");
    Ok(connection_manager)
}

pub(crate) fn stream_entries(ids: Vec<redis::streams::StreamId>) -> Result<Vec<crate::log::StreamEntry>> {
    ids.into_iter()
        .map(|id| {
            let fields = id
                .map
                .iter()
                .map(|(key, value)| Ok((key.clone(), redis::from_redis_value::<String>(value)?)))
                .collect::<Result<_>>()?;

            Ok(crate::log::StreamEntry {
                position: id.id.parse()?,
                fields,
            })
        })
        .collect()
}
