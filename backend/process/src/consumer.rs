//! # Consumer Groups
//!
//! A [`Worker`] pairs a [`ConsumerGroupReader`] with a [`Handler`]. Each
//! entry is acknowledged only after its handler returned, so a crash between
//! the two leaves it pending and it is delivered again. Handlers are written
//! to tolerate that.
//!
//! ## Read order
//!
//! 1. On start, drain this consumer's own pending backlog from the previous run.
//! 2. Periodically take over entries other consumers left pending too long.
//! 3. Otherwise wait, bounded, for entries never delivered to the group.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ledger::{
    ConsumerGroups, EventError, GroupStart, LedgerError, LogPosition, ReadFrom, StreamEntry,
};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::retry::{Backoff, RetryPolicy, Transient, retry};

#[derive(Error, Debug)]
pub enum HandleError {
    /// The entry can never be applied; it is acknowledged and dropped.
    #[error("Malformed event: {0}")]
    Malformed(#[from] EventError),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for HandleError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Event(e) => HandleError::Malformed(e),
            e => HandleError::Ledger(e),
        }
    }
}

impl Transient for HandleError {
    fn is_transient(&self) -> bool {
        match self {
            HandleError::Malformed(_) => false,
            HandleError::Ledger(e) => e.is_transient(),
        }
    }
}

/// Applies one entry's effect. Must be safe to call again for the same entry.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, entry: &StreamEntry) -> Result<(), HandleError>;
}

pub struct ConsumerGroupReader {
    groups: Arc<dyn ConsumerGroups>,
    pub stream: String,
    pub group: String,
    pub consumer: String,
    batch: usize,
    block: Duration,
    claim_idle: Option<Duration>,
    /// Cursor into our own pending entries while the backlog is drained.
    backlog: Option<LogPosition>,
    last_claim: Option<Instant>,
}

impl ConsumerGroupReader {
    pub fn new(groups: Arc<dyn ConsumerGroups>, stream: &str, group: &str, consumer: &str) -> Self {
        Self {
            groups,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            batch: 10,
            block: Duration::from_secs(2),
            claim_idle: None,
            backlog: Some(LogPosition::MIN),
            last_claim: None,
        }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_claim_idle(mut self, claim_idle: Option<Duration>) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    /// Creates the group if it is missing. Safe to call on every start.
    pub async fn subscribe(&self, start: GroupStart) -> ledger::Result<bool> {
        let created = self
            .groups
            .create_group(&self.stream, &self.group, start)
            .await?;

        if created {
            info!("Created group {} on {} at {start:?}", self.group, self.stream);
        } else {
            debug!("Group {} on {} already exists", self.group, self.stream);
        }

        Ok(created)
    }

    /// Next batch for this consumer, empty if nothing arrived within the
    /// block time.
    pub async fn poll(&mut self) -> ledger::Result<Vec<StreamEntry>> {
        if let Some(after) = self.backlog {
            let batch = self
                .groups
                .read_group(
                    &self.stream,
                    &self.group,
                    &self.consumer,
                    ReadFrom::Pending(after),
                    self.batch,
                    Duration::ZERO,
                )
                .await?;

            match batch.last() {
                Some(last) => {
                    self.backlog = Some(last.position);
                    return Ok(batch);
                }
                None => {
                    debug!("{} drained its backlog on {}", self.consumer, self.stream);
                    self.backlog = None;
                }
            }
        }

        if let Some(min_idle) = self.claim_idle {
            let due = self
                .last_claim
                .is_none_or(|last| last.elapsed() >= min_idle);

            if due {
                self.last_claim = Some(Instant::now());

                let claimed = self
                    .groups
                    .claim_idle(
                        &self.stream,
                        &self.group,
                        &self.consumer,
                        min_idle,
                        self.batch,
                    )
                    .await?;

                if !claimed.is_empty() {
                    info!(
                        "{} claimed {} idle entries on {}",
                        self.consumer,
                        claimed.len(),
                        self.stream
                    );
                    return Ok(claimed);
                }
            }
        }

        self.groups
            .read_group(
                &self.stream,
                &self.group,
                &self.consumer,
                ReadFrom::New,
                self.batch,
                self.block,
            )
            .await
    }

    pub async fn ack(&self, position: LogPosition) -> ledger::Result<bool> {
        self.groups.ack(&self.stream, &self.group, position).await
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: usize,
    pub malformed: usize,
    /// Entries left pending after a permanent failure.
    pub failed: usize,
}

pub struct Worker<H> {
    reader: ConsumerGroupReader,
    handler: H,
    retry: RetryPolicy,
    start: GroupStart,
}

impl<H: Handler> Worker<H> {
    pub fn new(reader: ConsumerGroupReader, handler: H) -> Self {
        Self {
            reader,
            handler,
            retry: RetryPolicy::default(),
            start: GroupStart::Tail,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_start(mut self, start: GroupStart) -> Self {
        self.start = start;
        self
    }

    /// Consumes until cancelled. Returns early only on errors that retrying
    /// cannot fix, such as the group disappearing.
    pub async fn run(mut self, cancel: CancellationToken) -> ledger::Result<WorkerStats> {
        let mut stats = WorkerStats::default();

        let reader = &self.reader;
        let start = self.start;
        let subscribed = retry(&self.retry, &cancel, "Group creation", move || {
            reader.subscribe(start)
        })
        .await;

        if let Err(e) = subscribed {
            if cancel.is_cancelled() {
                return Ok(stats);
            }
            return Err(e);
        }

        info!(
            "{} consuming {} as part of {}",
            self.reader.consumer, self.reader.stream, self.reader.group
        );

        'consume: loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = self.poll(&cancel) => batch?,
            };

            let Some(batch) = batch else { break };

            for entry in batch {
                if !self.process(&entry, &cancel, &mut stats).await {
                    break 'consume;
                }
            }
        }

        info!(
            "{} stopped: {} processed, {} malformed, {} failed",
            self.reader.consumer, stats.processed, stats.malformed, stats.failed
        );
        Ok(stats)
    }

    /// `None` once cancelled during a retry.
    async fn poll(&mut self, cancel: &CancellationToken) -> ledger::Result<Option<Vec<StreamEntry>>> {
        let mut backoff = Backoff::new(&self.retry);

        loop {
            match self.reader.poll().await {
                Ok(batch) => return Ok(Some(batch)),
                Err(e) if e.is_transient() => {
                    warn!(
                        "Reading {} failed, retrying in {:?}: {e}",
                        self.reader.stream,
                        backoff.delay()
                    );

                    if !backoff.wait(cancel).await {
                        return Ok(None);
                    }
                }
                Err(e) => {
                    error!("Reading {} failed: {e}", self.reader.stream);
                    return Err(e);
                }
            }
        }
    }

    /// Applies then acknowledges one entry. Returns `false` if cancelled
    /// before it was settled.
    async fn process(
        &self,
        entry: &StreamEntry,
        cancel: &CancellationToken,
        stats: &mut WorkerStats,
    ) -> bool {
        let handler = &self.handler;
        let applied = retry(&self.retry, cancel, "Handler", move || handler.handle(entry)).await;

        match applied {
            Ok(()) => stats.processed += 1,
            Err(HandleError::Malformed(e)) => {
                warn!("Dropping {} on {}: {e}", entry.position, self.reader.stream);
                stats.malformed += 1;
            }
            Err(e) if e.is_transient() => {
                debug!("Leaving {} pending on shutdown: {e}", entry.position);
                return false;
            }
            Err(e) => {
                error!(
                    "Failed to apply {} on {}, leaving it pending: {e}",
                    entry.position, self.reader.stream
                );
                stats.failed += 1;
                return true;
            }
        }

        let reader = &self.reader;
        let position = entry.position;
        match retry(&self.retry, cancel, "Ack", move || reader.ack(position)).await {
            Ok(_) => true,
            Err(e) => {
                if !e.is_transient() {
                    error!("Failed to ack {position} on {}: {e}", self.reader.stream);
                }
                !cancel.is_cancelled()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ledger::{Fields, memory::MemoryLog};

    use super::*;

    const STREAM: &str = "events:test";
    const GROUP: &str = "testers";

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<LogPosition>>>,
    }

    impl Recorder {
        fn seen(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn handle(&self, entry: &StreamEntry) -> Result<(), HandleError> {
            if entry.fields.contains_key("broken") {
                return Err(EventError::MissingField("article_id").into());
            }
            if entry.fields.contains_key("wrong") {
                return Err(HandleError::Ledger(LedgerError::WrongType("key".into())));
            }
            self.seen.lock().unwrap().push(entry.position);
            Ok(())
        }
    }

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn seeded(n: usize) -> Arc<MemoryLog> {
        let log = Arc::new(MemoryLog::new());
        for i in 0..n {
            log.append_at(STREAM, LogPosition::new(i as u64 + 1, 0), fields(&[("n", "1")]))
                .unwrap();
        }
        log
    }

    fn reader(log: &Arc<MemoryLog>, consumer: &str) -> ConsumerGroupReader {
        ConsumerGroupReader::new(log.clone(), STREAM, GROUP, consumer)
            .with_batch(2)
            .with_block(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_backlog_is_drained_before_new_entries() {
        let log = seeded(3).await;
        let mut first = reader(&log, "c1");
        first.subscribe(GroupStart::Beginning).await.unwrap();

        // Delivered but never acked, as after a crash.
        assert_eq!(first.poll().await.unwrap().len(), 2);
        assert_eq!(first.poll().await.unwrap().len(), 1);

        let mut restarted = reader(&log, "c1");
        let backlog = restarted.poll().await.unwrap();
        assert_eq!(
            backlog.iter().map(|e| e.position).collect::<Vec<_>>(),
            vec![LogPosition::new(1, 0), LogPosition::new(2, 0)]
        );
        assert_eq!(restarted.poll().await.unwrap().len(), 1);
        assert_eq!(restarted.poll().await.unwrap().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_entries_are_claimed() {
        let log = seeded(1).await;
        let mut crashed = reader(&log, "c1");
        crashed.subscribe(GroupStart::Beginning).await.unwrap();
        assert_eq!(crashed.poll().await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(120)).await;

        let mut survivor = reader(&log, "c2").with_claim_idle(Some(Duration::from_secs(60)));
        let claimed = survivor.poll().await.unwrap();
        assert_eq!(claimed[0].position, LogPosition::new(1, 0));
    }

    #[tokio::test]
    async fn test_worker_acks_after_apply() {
        let log = seeded(3).await;
        log.append_at(STREAM, LogPosition::new(10, 0), fields(&[("broken", "1")]))
            .unwrap();

        let handler = Recorder::default();
        let worker =
            Worker::new(reader(&log, "c1"), handler.clone()).with_start(GroupStart::Beginning);

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let task = tokio::spawn(worker.run(cancel));

        while handler.seen() < 3 || log.pending_count(STREAM, GROUP) != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stopper.cancel();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.malformed, 1);
    }

    #[tokio::test]
    async fn test_stopped_worker_takes_no_batch() {
        let log = seeded(3).await;
        let handler = Recorder::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Both branches are ready on every attempt; the stop must win each time.
        for _ in 0..20 {
            let stats = Worker::new(reader(&log, "c1"), handler.clone())
                .with_start(GroupStart::Beginning)
                .run(cancel.clone())
                .await
                .unwrap();
            assert_eq!(stats, WorkerStats::default());
        }

        assert_eq!(handler.seen(), 0);
        assert_eq!(log.pending_count(STREAM, GROUP), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_stays_pending() {
        let log = seeded(1).await;
        log.append_at(STREAM, LogPosition::new(10, 0), fields(&[("wrong", "1")]))
            .unwrap();

        let handler = Recorder::default();
        let worker =
            Worker::new(reader(&log, "c1"), handler.clone()).with_start(GroupStart::Beginning);

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let task = tokio::spawn(worker.run(cancel));

        while handler.seen() < 1 || log.delivery_count(STREAM, GROUP, LogPosition::new(10, 0)).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopper.cancel();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(log.pending_count(STREAM, GROUP), 1);
    }
}
