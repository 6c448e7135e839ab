use std::{ops::Bound, time::Duration};

use async_trait::async_trait;
use redis::{
    AsyncCommands,
    aio::ConnectionManager,
    streams::{
        StreamAutoClaimOptions, StreamAutoClaimReply, StreamRangeReply, StreamReadOptions,
        StreamReadReply,
    },
};
use tracing::debug;

use super::stream_entries;
use crate::{
    error::Result,
    events::Fields,
    log::{ConsumerGroups, EventLog, ReadFrom, StreamEntry},
    position::{GroupStart, LogPosition, render_bound},
};

pub struct RedisLog {
    connection: ConnectionManager,
    blocking: ConnectionManager,
}

impl RedisLog {
    /// `blocking` carries only `XREADGROUP ... BLOCK`; its response timeout
    /// must outlast the longest block.
    pub fn new(connection: ConnectionManager, blocking: ConnectionManager) -> Self {
        Self {
            connection,
            blocking,
        }
    }
}

#[async_trait]
impl EventLog for RedisLog {
    async fn append(&self, stream: &str, fields: &Fields) -> Result<LogPosition> {
        let mut pairs = fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect::<Vec<_>>();
        pairs.sort();

        let mut connection = self.connection.clone();
        let id: String = connection.xadd(stream, "*", &pairs).await?;

        id.parse()
    }

    async fn range(
        &self,
        stream: &str,
        from: Bound<LogPosition>,
        to: Bound<LogPosition>,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let start = render_bound(from.as_ref(), "-");
        let end = render_bound(to.as_ref(), "+");

        let mut connection = self.connection.clone();
        let reply: StreamRangeReply = connection.xrange_count(stream, start, end, count).await?;

        stream_entries(reply.ids)
    }
}

#[async_trait]
impl ConsumerGroups for RedisLog {
    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<bool> {
        let id = match start {
            GroupStart::Beginning => "0".to_string(),
            GroupStart::Tail => "$".to_string(),
            GroupStart::After(position) => position.to_string(),
        };

        let mut connection = self.connection.clone();
        let created: redis::RedisResult<()> =
            connection.xgroup_create_mkstream(stream, group, id).await;

        match created {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group {group} already exists on {stream}");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);

        let (id, mut connection) = match from {
            ReadFrom::Pending(after) => (after.to_string(), self.connection.clone()),
            ReadFrom::New => {
                if !block.is_zero() {
                    options = options.block(block.as_millis() as usize);
                }
                (">".to_string(), self.blocking.clone())
            }
        };

        let reply: Option<StreamReadReply> =
            connection.xread_options(&[stream], &[id], &options).await?;

        let ids = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .collect();

        stream_entries(ids)
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let options = StreamAutoClaimOptions::default().count(count);

        let mut connection = self.connection.clone();
        let reply: StreamAutoClaimReply = connection
            .xautoclaim_options(
                stream,
                group,
                consumer,
                min_idle.as_millis() as u64,
                "0-0",
                options,
            )
            .await?;

        stream_entries(reply.claimed)
    }

    async fn ack(&self, stream: &str, group: &str, position: LogPosition) -> Result<bool> {
        let mut connection = self.connection.clone();
        let acked: i64 = connection
            .xack(stream, group, &[position.to_string()])
            .await?;

        Ok(acked > 0)
    }
}
