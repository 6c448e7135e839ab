//! # Event Log
//!
//! Append-only, totally ordered streams of field maps, plus durable consumer
//! groups over them.
//!
//! ## Contract
//! - `append` is visible to `range` and group reads as soon as it returns.
//! - `range` is finite and restartable: [`RangeScan`] pages through it with an
//!   exclusive lower bound on the last position seen.
//! - A group delivers each entry to one consumer at a time. Entries stay
//!   pending for that consumer until acknowledged, so delivery is
//!   at-least-once.
use std::{collections::VecDeque, ops::Bound, time::Duration};

use async_trait::async_trait;

use crate::{
    error::Result,
    events::{Fields, TypedEvent},
    position::{GroupStart, LogPosition},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    pub position: LogPosition,
    pub fields: Fields,
}

/// Which entries a group read asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries already delivered to this consumer and not yet acknowledged,
    /// strictly after the given position.
    Pending(LogPosition),
    /// Entries never delivered to the group.
    New,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, stream: &str, fields: &Fields) -> Result<LogPosition>;

    /// Up to `count` entries within the bounds, in log order.
    async fn range(
        &self,
        stream: &str,
        from: Bound<LogPosition>,
        to: Bound<LogPosition>,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;
}

#[async_trait]
pub trait ConsumerGroups: Send + Sync {
    /// Creates the group (and the stream if needed). Returns `false` when the
    /// group already existed.
    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<bool>;

    /// Reads for `consumer`. Only [`ReadFrom::New`] waits, for at most
    /// `block`, and returns an empty batch on timeout.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// Transfers entries pending on other consumers for at least `min_idle`
    /// to `consumer` and returns them.
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Returns whether the entry was pending.
    async fn ack(&self, stream: &str, group: &str, position: LogPosition) -> Result<bool>;
}

pub async fn append_event<E: TypedEvent>(
    log: &dyn EventLog,
    stream: &str,
    event: &E,
) -> Result<LogPosition> {
    log.append(stream, &event.to_fields()).await
}

/// Lazily pages through `range`.
///
/// ```ignore
/// let mut scan = RangeScan::new(log, "events:article:views", Bound::Unbounded, Bound::Unbounded);
/// while let Some(entry) = scan.next().await? {
///     tally(entry);
/// }
/// ```
pub struct RangeScan<'a> {
    log: &'a dyn EventLog,
    stream: String,
    from: Bound<LogPosition>,
    to: Bound<LogPosition>,
    page_size: usize,
    buffer: VecDeque<StreamEntry>,
    exhausted: bool,
}

impl<'a> RangeScan<'a> {
    pub const DEFAULT_PAGE_SIZE: usize = 500;

    pub fn new(
        log: &'a dyn EventLog,
        stream: &str,
        from: Bound<LogPosition>,
        to: Bound<LogPosition>,
    ) -> Self {
        Self {
            log,
            stream: stream.to_string(),
            from,
            to,
            page_size: Self::DEFAULT_PAGE_SIZE,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Position the scan would resume after, if anything was read.
    pub fn resume_bound(&self) -> Bound<LogPosition> {
        self.from
    }

    pub async fn next(&mut self) -> Result<Option<StreamEntry>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .log
                .range(&self.stream, self.from, self.to, self.page_size)
                .await?;

            if page.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.from = Bound::Excluded(last.position);
            }
            self.buffer.extend(page);
        }

        Ok(self.buffer.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLog;

    fn fields(n: usize) -> Fields {
        Fields::from([("n".to_string(), n.to_string())])
    }

    #[tokio::test]
    async fn test_scan_pages_through_everything_in_order() {
        let log = MemoryLog::new();
        for n in 0..7 {
            log.append("s", &fields(n)).await.unwrap();
        }

        let mut scan = RangeScan::new(&log, "s", Bound::Unbounded, Bound::Unbounded).with_page_size(3);
        let mut seen = Vec::new();
        while let Some(entry) = scan.next().await.unwrap() {
            seen.push(entry.fields["n"].clone());
        }

        assert_eq!(seen, ["0", "1", "2", "3", "4", "5", "6"]);
    }

    #[tokio::test]
    async fn test_scan_is_restartable_from_any_position() {
        let log = MemoryLog::new();
        let mut positions = Vec::new();
        for n in 0..5 {
            positions.push(log.append("s", &fields(n)).await.unwrap());
        }

        let mut scan = RangeScan::new(
            &log,
            "s",
            Bound::Excluded(positions[1]),
            Bound::Included(positions[3]),
        );
        let mut seen = Vec::new();
        while let Some(entry) = scan.next().await.unwrap() {
            seen.push(entry.position);
        }

        assert_eq!(seen, positions[2..=3]);
        assert_eq!(scan.resume_bound(), Bound::Excluded(positions[3]));
    }

    #[tokio::test]
    async fn test_scan_of_missing_stream_is_empty() {
        let log = MemoryLog::new();
        let mut scan = RangeScan::new(&log, "nothing", Bound::Unbounded, Bound::Unbounded);
        assert!(scan.next().await.unwrap().is_none());
    }
}
