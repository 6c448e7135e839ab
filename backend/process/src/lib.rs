//! # Event Processing
//!
//! Workers that turn the raw event streams into the structures the server
//! reads.
//!
//! ## Streams
//!
//! | Stream | Event | Consumed by |
//! |---|---|---|
//! | `events:article:views` | article view | recently viewed (group `recently_viewed`), popularity rebuild (range scan) |
//! | `events:search:queries` | search query | query ingest (group `search_analytics`) |
//! | `events:search:clicks` | search click | click counter (group `search_analytics`) |
//!
//! ## Redis
//! - `recently_viewed:{session}` (**sorted set**, article id scored by view
//!   position): five newest per session. TTL: 24 hours, reset on every view.
//!
//! - `{popular_articles}` (**sorted set**, article id scored by view count):
//!   replaced wholesale by each rebuild. Staging copies live under
//!   `{popular_articles}:{uuid}` until swapped.
//!
//! - `clicks:{search id}` (**int**) and `clicks:{search id}:counted` (**set**
//!   of click entry ids): click counter that ignores redelivered clicks.
//!   TTL: 1 hour.
//!
//! - `analytics:search:query:{search id}` (**hash**): one document per search,
//!   indexed by RediSearch as `analytics:search`.
//!
//! ## Delivery
//! Group workers acknowledge an entry only after applying it, so every
//! handler tolerates seeing the same entry twice. Malformed entries are
//! logged and acknowledged; entries that fail for any other permanent reason
//! stay pending for inspection or a later claim.
use std::time::Duration;

use ledger::{Backends, GroupStart};
use tokio_util::sync::CancellationToken;
use tracing::error;

pub mod clicks;
pub mod config;
pub mod consumer;
pub mod popular;
pub mod queries;
pub mod recently_viewed;
pub mod retry;

use clicks::ClickCounter;
use config::Config;
use consumer::{ConsumerGroupReader, Handler, Worker, WorkerStats};
use popular::PopularityRebuild;
use queries::QueryIngest;
use recently_viewed::RecentlyViewed;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consumer {
    RecentlyViewed,
    SearchQueries,
    SearchClicks,
}

impl Consumer {
    pub const ALL: [Consumer; 3] = [
        Consumer::RecentlyViewed,
        Consumer::SearchQueries,
        Consumer::SearchClicks,
    ];

    pub fn stream<'a>(&self, config: &'a Config) -> &'a str {
        match self {
            Consumer::RecentlyViewed => &config.views_stream,
            Consumer::SearchQueries => &config.queries_stream,
            Consumer::SearchClicks => &config.clicks_stream,
        }
    }

    pub fn group<'a>(&self, config: &'a Config) -> &'a str {
        match self {
            Consumer::RecentlyViewed => &config.recently_viewed_group,
            Consumer::SearchQueries | Consumer::SearchClicks => &config.search_analytics_group,
        }
    }
}

fn worker<H: Handler>(
    backends: &Backends,
    config: &Config,
    kind: Consumer,
    name: &str,
    start: GroupStart,
    handler: H,
) -> Worker<H> {
    let reader = ConsumerGroupReader::new(
        backends.groups.clone(),
        kind.stream(config),
        kind.group(config),
        name,
    )
    .with_batch(config.batch)
    .with_block(config.block)
    .with_claim_idle(config.claim_idle);

    Worker::new(reader, handler)
        .with_retry(config.retry.clone())
        .with_start(start)
}

/// Runs one group consumer named `name` until cancelled.
pub async fn run_consumer(
    kind: Consumer,
    backends: &Backends,
    config: &Config,
    name: &str,
    start: GroupStart,
    cancel: CancellationToken,
) -> ledger::Result<WorkerStats> {
    match kind {
        Consumer::RecentlyViewed => {
            let handler = RecentlyViewed::new(backends.store.clone());
            worker(backends, config, kind, name, start, handler)
                .run(cancel)
                .await
        }
        Consumer::SearchQueries => {
            let handler = QueryIngest::new(backends.index.clone());
            worker(backends, config, kind, name, start, handler)
                .run(cancel)
                .await
        }
        Consumer::SearchClicks => {
            let handler = ClickCounter::new(backends.store.clone(), backends.index.clone());
            worker(backends, config, kind, name, start, handler)
                .run(cancel)
                .await
        }
    }
}

pub fn popularity(backends: &Backends, config: &Config) -> PopularityRebuild {
    PopularityRebuild::new(
        backends.log.clone(),
        backends.store.clone(),
        &config.views_stream,
    )
}

/// Spawns every group consumer plus a periodic popularity rebuild, all
/// stopped by `cancel`.
pub fn spawn_all(
    backends: Backends,
    config: Config,
    name: &str,
    popular_every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinSet<()> {
    let mut tasks = tokio::task::JoinSet::new();

    for kind in Consumer::ALL {
        let backends = backends.clone();
        let config = config.clone();
        let name = name.to_string();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            if let Err(e) =
                run_consumer(kind, &backends, &config, &name, GroupStart::Tail, cancel).await
            {
                error!("{kind:?} consumer stopped: {e}");
            }
        });
    }

    tasks.spawn(async move {
        popularity(&backends, &config)
            .run_every(popular_every, None, cancel)
            .await;
    });

    tasks
}
