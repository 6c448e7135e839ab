use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager, pipe};

use crate::{
    error::Result,
    store::{RankedStore, counted_tokens_key},
};

/// Counts a token at most once: `KEYS[1]` counter, `KEYS[2]` counted tokens,
/// `ARGV[1]` token, `ARGV[2]` ttl seconds.
const INCREMENT_ONCE: &str = r"
local count
if redis.call('SADD', KEYS[2], ARGV[1]) == 1 then
    count = redis.call('INCR', KEYS[1])
else
    count = tonumber(redis.call('GET', KEYS[1]) or '0')
end
redis.call('EXPIRE', KEYS[1], ARGV[2])
redis.call('EXPIRE', KEYS[2], ARGV[2])
return count
";

pub struct RedisStore {
    connection: ConnectionManager,
    count_once: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            count_once: Script::new(INCREMENT_ONCE),
        }
    }
}

#[async_trait]
impl RankedStore for RedisStore {
    async fn push_capped(
        &self,
        key: &str,
        member: &str,
        score: f64,
        keep: usize,
        ttl: Duration,
    ) -> Result<()> {
        let mut connection = self.connection.clone();

        pipe()
            .atomic()
            .zadd(key, member, score)
            .ignore()
            .zremrangebyrank(key, 0, -(keep as isize) - 1)
            .ignore()
            .expire(key, ttl.as_secs() as i64)
            .ignore()
            .query_async::<()>(&mut connection)
            .await?;

        Ok(())
    }

    async fn increment_once(&self, key: &str, token: &str, ttl: Duration) -> Result<i64> {
        let mut connection = self.connection.clone();

        let count = self
            .count_once
            .key(key)
            .key(counted_tokens_key(key))
            .arg(token)
            .arg(ttl.as_secs())
            .invoke_async::<i64>(&mut connection)
            .await?;

        Ok(count)
    }

    async fn increment_scores(
        &self,
        key: &str,
        deltas: &[(String, f64)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }

        let mut pipeline = pipe();
        pipeline.atomic();
        for (member, delta) in deltas {
            pipeline.zincr(key, member, *delta).ignore();
        }
        if let Some(ttl) = ttl {
            pipeline.expire(key, ttl.as_secs().max(1) as i64).ignore();
        }

        let mut connection = self.connection.clone();
        pipeline.query_async::<()>(&mut connection).await?;
        Ok(())
    }

    async fn replace(&self, source: &str, target: &str) -> Result<()> {
        let mut connection = self.connection.clone();

        pipe()
            .atomic()
            .unlink(target)
            .ignore()
            .rename(source, target)
            .ignore()
            .persist(target)
            .ignore()
            .query_async::<()>(&mut connection)
            .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.unlink::<_, ()>(key).await?;
        Ok(())
    }

    async fn top(&self, key: &str, limit: Option<usize>) -> Result<Vec<(String, f64)>> {
        let stop = match limit {
            Some(0) => return Ok(Vec::new()),
            Some(limit) => limit as isize - 1,
            None => -1,
        };

        let mut connection = self.connection.clone();
        let members: Vec<(String, f64)> = connection.zrevrange_withscores(key, 0, stop).await?;
        Ok(members)
    }

    async fn counter(&self, key: &str) -> Result<Option<i64>> {
        let mut connection = self.connection.clone();
        let count: Option<i64> = connection.get(key).await?;
        Ok(count)
    }
}
