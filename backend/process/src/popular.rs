//! # Popularity Leaderboard
//!
//! Rebuilt from scratch on each run rather than updated incrementally:
//! scan the view stream, tally views per article into a staging key, then
//! swap the staging key over the leaderboard in one step. Readers see the
//! previous leaderboard until the swap and the complete new one after it.
//!
//! A run that finds nothing to tally leaves the current leaderboard alone.
use std::{collections::HashMap, ops::Bound, sync::Arc, time::Duration};

use ledger::{
    ArticleView, EventLog, LogPosition, RangeScan, RankedStore, TypedEvent, keys,
    position::now_millis,
};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Expiry of a staging key, reset on every write to it. Covers a rebuild
/// that dies before it can swap or discard.
pub const STAGING_TTL: Duration = Duration::from_secs(60 * 60);

/// `[now - lookback, now)`, or everything without a lookback.
fn window(lookback: Option<Duration>, now: u64) -> (Bound<LogPosition>, Bound<LogPosition>) {
    match lookback {
        Some(lookback) => {
            let since = now.saturating_sub(lookback.as_millis() as u64);
            (
                Bound::Included(LogPosition::at_millis(since)),
                Bound::Excluded(LogPosition::at_millis(now)),
            )
        }
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildOutcome {
    pub scanned: usize,
    pub tallied: usize,
    pub swapped: bool,
}

pub struct PopularityRebuild {
    log: Arc<dyn EventLog>,
    store: Arc<dyn RankedStore>,
    stream: String,
    page_size: usize,
}

impl PopularityRebuild {
    pub fn new(log: Arc<dyn EventLog>, store: Arc<dyn RankedStore>, stream: &str) -> Self {
        Self {
            log,
            store,
            stream: stream.to_string(),
            page_size: RangeScan::DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Tallies views in `[now - lookback, now)`, or the whole stream.
    pub async fn rebuild(&self, lookback: Option<Duration>) -> ledger::Result<RebuildOutcome> {
        let (from, to) = window(lookback, now_millis());
        self.rebuild_range(from, to).await
    }

    pub async fn rebuild_range(
        &self,
        from: Bound<LogPosition>,
        to: Bound<LogPosition>,
    ) -> ledger::Result<RebuildOutcome> {
        let outcome = self.staged(from, to, &CancellationToken::new()).await?;
        Ok(outcome.unwrap_or_default())
    }

    /// Like [`Self::rebuild`], but gives up when `cancel` fires. A run given
    /// up on returns `None`, leaves the leaderboard alone and discards its
    /// staging key.
    pub async fn rebuild_until(
        &self,
        lookback: Option<Duration>,
        cancel: &CancellationToken,
    ) -> ledger::Result<Option<RebuildOutcome>> {
        let (from, to) = window(lookback, now_millis());
        self.staged(from, to, cancel).await
    }

    async fn staged(
        &self,
        from: Bound<LogPosition>,
        to: Bound<LogPosition>,
        cancel: &CancellationToken,
    ) -> ledger::Result<Option<RebuildOutcome>> {
        let staging = keys::popular_staging(&Uuid::new_v4().simple().to_string());

        let tallied = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            tallied = self.tally(&staging, from, to) => Some(tallied),
        };

        let mut outcome = match tallied {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                self.discard(&staging).await;
                return Err(e);
            }
            None => {
                self.discard(&staging).await;
                info!("Popularity rebuild cancelled");
                return Ok(None);
            }
        };

        if outcome.tallied > 0 {
            if let Err(e) = self.store.replace(&staging, keys::POPULAR_ARTICLES).await {
                self.discard(&staging).await;
                return Err(e);
            }
            outcome.swapped = true;
        } else {
            self.store.remove(&staging).await?;
        }

        info!(
            "Popularity rebuild scanned {} views, tallied {}, swapped: {}",
            outcome.scanned, outcome.tallied, outcome.swapped
        );
        Ok(Some(outcome))
    }

    async fn discard(&self, staging: &str) {
        if let Err(e) = self.store.remove(staging).await {
            warn!("Failed to discard {staging}, it expires in {STAGING_TTL:?}: {e}");
        }
    }

    async fn tally(
        &self,
        staging: &str,
        from: Bound<LogPosition>,
        to: Bound<LogPosition>,
    ) -> ledger::Result<RebuildOutcome> {
        let mut outcome = RebuildOutcome::default();
        let mut counts: HashMap<String, f64> = HashMap::new();
        let mut scan =
            RangeScan::new(self.log.as_ref(), &self.stream, from, to).with_page_size(self.page_size);

        while let Some(entry) = scan.next().await? {
            outcome.scanned += 1;

            match ArticleView::from_fields(&entry.fields) {
                Ok(view) => {
                    *counts.entry(view.article_id).or_default() += 1.0;
                    outcome.tallied += 1;
                }
                Err(e) => warn!("Skipping view {}: {e}", entry.position),
            }

            if counts.len() >= self.page_size {
                self.flush(staging, &mut counts).await?;
            }
        }

        self.flush(staging, &mut counts).await?;
        Ok(outcome)
    }

    async fn flush(&self, staging: &str, counts: &mut HashMap<String, f64>) -> ledger::Result<()> {
        if counts.is_empty() {
            return Ok(());
        }

        let deltas: Vec<(String, f64)> = counts.drain().collect();
        self.store
            .increment_scores(staging, &deltas, Some(STAGING_TTL))
            .await
    }

    /// Rebuilds every `period` until cancelled. A failed run is logged and
    /// the next tick tries again.
    pub async fn run_every(
        &self,
        period: Duration,
        lookback: Option<Duration>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.rebuild_until(lookback, &cancel).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => error!("Popularity rebuild failed: {e}"),
            }
        }

        info!("Popularity rebuild stopped");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ledger::{
        Fields, LedgerError, StreamEntry,
        memory::{MemoryLog, MemoryStore},
    };
    use tokio::time::{sleep, timeout};

    use super::*;

    /// Serves the first page, then never answers again.
    struct StallingLog(Arc<MemoryLog>);

    #[async_trait]
    impl EventLog for StallingLog {
        async fn append(&self, stream: &str, fields: &Fields) -> ledger::Result<LogPosition> {
            self.0.append(stream, fields).await
        }

        async fn range(
            &self,
            stream: &str,
            from: Bound<LogPosition>,
            to: Bound<LogPosition>,
            count: usize,
        ) -> ledger::Result<Vec<StreamEntry>> {
            if matches!(from, Bound::Excluded(_)) {
                std::future::pending::<()>().await;
            }
            self.0.range(stream, from, to, count).await
        }
    }

    /// Refuses every swap.
    #[derive(Default)]
    struct SwapRefused(MemoryStore);

    #[async_trait]
    impl RankedStore for SwapRefused {
        async fn push_capped(
            &self,
            key: &str,
            member: &str,
            score: f64,
            keep: usize,
            ttl: Duration,
        ) -> ledger::Result<()> {
            self.0.push_capped(key, member, score, keep, ttl).await
        }

        async fn increment_once(&self, key: &str, token: &str, ttl: Duration) -> ledger::Result<i64> {
            self.0.increment_once(key, token, ttl).await
        }

        async fn increment_scores(
            &self,
            key: &str,
            deltas: &[(String, f64)],
            ttl: Option<Duration>,
        ) -> ledger::Result<()> {
            self.0.increment_scores(key, deltas, ttl).await
        }

        async fn replace(&self, _source: &str, target: &str) -> ledger::Result<()> {
            Err(LedgerError::WrongType(target.to_string()))
        }

        async fn remove(&self, key: &str) -> ledger::Result<()> {
            self.0.remove(key).await
        }

        async fn top(&self, key: &str, limit: Option<usize>) -> ledger::Result<Vec<(String, f64)>> {
            self.0.top(key, limit).await
        }

        async fn counter(&self, key: &str) -> ledger::Result<Option<i64>> {
            self.0.counter(key).await
        }
    }

    const STREAM: &str = "events:article:views";

    fn view(article_id: &str) -> Fields {
        ArticleView {
            article_id: article_id.to_string(),
            article_title: String::new(),
            user_id: String::new(),
            session_id: "s1".to_string(),
        }
        .to_fields()
    }

    fn seeded(articles: &[&str]) -> Arc<MemoryLog> {
        let log = Arc::new(MemoryLog::new());
        for (i, article_id) in articles.iter().enumerate() {
            log.append_at(STREAM, LogPosition::new(i as u64 + 1, 0), view(article_id))
                .unwrap();
        }
        log
    }

    #[tokio::test]
    async fn test_counts_views_per_article() {
        let log = seeded(&["A", "B", "A", "A"]);
        let store = Arc::new(MemoryStore::new());
        let rebuild = PopularityRebuild::new(log, store.clone(), STREAM).with_page_size(2);

        let outcome = rebuild.rebuild(None).await.unwrap();

        assert_eq!(
            outcome,
            RebuildOutcome {
                scanned: 4,
                tallied: 4,
                swapped: true
            }
        );
        assert_eq!(
            store.top(keys::POPULAR_ARTICLES, None).await.unwrap(),
            vec![("A".to_string(), 3.0), ("B".to_string(), 1.0)]
        );
        assert_eq!(store.keys(), vec![keys::POPULAR_ARTICLES.to_string()]);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_leaderboard() {
        let store = Arc::new(MemoryStore::new());
        store
            .increment_scores(keys::POPULAR_ARTICLES, &[("stale".to_string(), 9.0)], None)
            .await
            .unwrap();

        let rebuild = PopularityRebuild::new(seeded(&["A"]), store.clone(), STREAM);
        rebuild.rebuild(None).await.unwrap();

        assert_eq!(
            store.top(keys::POPULAR_ARTICLES, None).await.unwrap(),
            vec![("A".to_string(), 1.0)]
        );
    }

    #[tokio::test]
    async fn test_empty_window_keeps_leaderboard() {
        let store = Arc::new(MemoryStore::new());
        store
            .increment_scores(keys::POPULAR_ARTICLES, &[("A".to_string(), 2.0)], None)
            .await
            .unwrap();

        let rebuild = PopularityRebuild::new(seeded(&["A", "B"]), store.clone(), STREAM);
        let outcome = rebuild
            .rebuild_range(Bound::Excluded(LogPosition::new(2, 0)), Bound::Unbounded)
            .await
            .unwrap();

        assert!(!outcome.swapped);
        assert_eq!(
            store.top(keys::POPULAR_ARTICLES, None).await.unwrap(),
            vec![("A".to_string(), 2.0)]
        );
        assert_eq!(store.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_views_are_skipped() {
        let log = seeded(&["A"]);
        let mut broken = view("B");
        broken.remove("article_id");
        log.append_at(STREAM, LogPosition::new(10, 0), broken).unwrap();

        let store = Arc::new(MemoryStore::new());
        let outcome = PopularityRebuild::new(log, store.clone(), STREAM)
            .rebuild(None)
            .await
            .unwrap();

        assert_eq!(outcome.scanned, 2);
        assert_eq!(outcome.tallied, 1);
        assert_eq!(
            store.top(keys::POPULAR_ARTICLES, None).await.unwrap(),
            vec![("A".to_string(), 1.0)]
        );
    }

    #[tokio::test]
    async fn test_lookback_excludes_old_and_future_views() {
        let log = seeded(&["old"]);
        let now = now_millis();
        log.append_at(STREAM, LogPosition::new(now - 1_000, 0), view("new")).unwrap();
        log.append_at(STREAM, LogPosition::new(now + 60_000, 0), view("future")).unwrap();

        let store = Arc::new(MemoryStore::new());
        PopularityRebuild::new(log, store.clone(), STREAM)
            .rebuild(Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(
            store.top(keys::POPULAR_ARTICLES, None).await.unwrap(),
            vec![("new".to_string(), 1.0)]
        );
    }

    #[test]
    fn test_window_ends_at_now() {
        assert_eq!(
            window(Some(Duration::from_secs(60)), 100_000),
            (
                Bound::Included(LogPosition::at_millis(40_000)),
                Bound::Excluded(LogPosition::at_millis(100_000))
            )
        );
        assert_eq!(window(None, 100_000), (Bound::Unbounded, Bound::Unbounded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_rebuild_discards_staging() {
        let store = Arc::new(MemoryStore::new());
        store
            .increment_scores(keys::POPULAR_ARTICLES, &[("A".to_string(), 2.0)], None)
            .await
            .unwrap();

        let log = Arc::new(StallingLog(seeded(&["B", "B"])));
        let rebuild = PopularityRebuild::new(log, store.clone(), STREAM).with_page_size(1);
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                rebuild
                    .run_every(Duration::from_secs(60), None, cancel)
                    .await
            })
        };

        let staging = timeout(Duration::from_secs(10), async {
            loop {
                if let Some(key) = store
                    .keys()
                    .into_iter()
                    .find(|key| key != keys::POPULAR_ARTICLES)
                {
                    break key;
                }
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert!(store.ttl(&staging).is_some_and(|ttl| ttl <= STAGING_TTL));

        cancel.cancel();
        task.await.unwrap();

        assert_eq!(store.keys(), vec![keys::POPULAR_ARTICLES.to_string()]);
        assert_eq!(
            store.top(keys::POPULAR_ARTICLES, None).await.unwrap(),
            vec![("A".to_string(), 2.0)]
        );
    }

    #[tokio::test]
    async fn test_failed_swap_discards_staging() {
        let store = Arc::new(SwapRefused::default());
        let rebuild = PopularityRebuild::new(seeded(&["A", "B"]), store.clone(), STREAM);

        let err = rebuild.rebuild(None).await.unwrap_err();

        assert!(matches!(err, LedgerError::WrongType(_)));
        assert!(store.0.keys().is_empty());
    }
}
