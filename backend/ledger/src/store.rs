//! # Ranked Store
//!
//! Key/value store with ranked sets and counters, the shape of the Redis
//! structures the aggregators keep.
//!
//! ## Requirements
//!
//! - Every method is one atomic unit: a reader never observes half of it.
//! - Every write that can be redelivered is idempotent when called again with
//!   the same arguments.
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait RankedStore: Send + Sync {
    /// Sets `member`'s score, keeps only the `keep` highest scored members
    /// and resets the key's expiry to `ttl`.
    async fn push_capped(
        &self,
        key: &str,
        member: &str,
        score: f64,
        keep: usize,
        ttl: Duration,
    ) -> Result<()>;

    /// Increments the counter at `key` unless `token` was already counted
    /// for it, resets the expiry of both to `ttl` and returns the counter.
    async fn increment_once(&self, key: &str, token: &str, ttl: Duration) -> Result<i64>;

    /// Adds each delta to its member's score, creating members as needed.
    /// With a `ttl` the key's expiry is reset to it.
    async fn increment_scores(
        &self,
        key: &str,
        deltas: &[(String, f64)],
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Deletes `target` and renames `source` to it, as one step. `target`
    /// keeps no expiry `source` may have had.
    async fn replace(&self, source: &str, target: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Members with scores, highest first, at most `limit` of them.
    async fn top(&self, key: &str, limit: Option<usize>) -> Result<Vec<(String, f64)>>;

    async fn counter(&self, key: &str) -> Result<Option<i64>>;
}

/// Key holding the set of tokens already counted by
/// [`RankedStore::increment_once`].
pub fn counted_tokens_key(key: &str) -> String {
    format!("{key}:counted")
}
