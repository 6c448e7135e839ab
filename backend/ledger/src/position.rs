//! # Log Positions
//!
//! Every entry appended to a stream gets a `LogPosition`: a millisecond
//! timestamp plus a sequence number that disambiguates entries appended in
//! the same millisecond. Positions are assigned by the log, never reused, and
//! totally order the entries of one stream.
//!
//! The textual form is `{millis}-{sequence}`, the same shape Redis Streams use
//! for entry ids, so positions round-trip through Redis untouched.
use std::{fmt, ops::Bound, str::FromStr};

use serde::{Deserialize, Serialize, de, ser};

use crate::error::LedgerError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    pub millis: u64,
    pub sequence: u64,
}

impl LogPosition {
    pub const MIN: LogPosition = LogPosition {
        millis: 0,
        sequence: 0,
    };

    pub fn new(millis: u64, sequence: u64) -> Self {
        Self { millis, sequence }
    }

    /// First possible position inside the given millisecond.
    pub fn at_millis(millis: u64) -> Self {
        Self::new(millis, 0)
    }

    /// Position immediately after `self` when appending at `now_millis`.
    pub fn successor(&self, now_millis: u64) -> Self {
        if now_millis > self.millis {
            Self::new(now_millis, 0)
        } else {
            Self::new(self.millis, self.sequence + 1)
        }
    }

    /// Ranked-set score preserving position order.
    ///
    /// `millis * 1000 + min(sequence, 999)` stays exact in an `f64` for any
    /// realistic wall clock, so entries appended within one millisecond still
    /// rank by sequence.
    pub fn score(&self) -> f64 {
        (self.millis * 1000 + self.sequence.min(999)) as f64
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.sequence)
    }
}

impl FromStr for LogPosition {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::InvalidPosition(s.to_string());

        let (millis, sequence) = match s.split_once('-') {
            Some((millis, sequence)) => (millis, sequence),
            None => (s, "0"),
        };

        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            sequence: sequence.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for LogPosition {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogPosition {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Wall clock in milliseconds since the epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Where a consumer group's cursor starts when it is first created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupStart {
    /// Deliver every entry already in the stream.
    Beginning,
    /// Deliver only entries appended after the group is created.
    #[default]
    Tail,
    /// Deliver entries strictly after the given position.
    After(LogPosition),
}

/// Redis-style rendering of a range bound: `-`/`+` for the open ends and a
/// `(` prefix for exclusive bounds.
pub(crate) fn render_bound(bound: Bound<&LogPosition>, open: &str) -> String {
    match bound {
        Bound::Unbounded => open.to_string(),
        Bound::Included(position) => position.to_string(),
        Bound::Excluded(position) => format!("({position}"),
    }
}

pub(crate) fn contains(
    from: Bound<&LogPosition>,
    to: Bound<&LogPosition>,
    position: &LogPosition,
) -> bool {
    let above = match from {
        Bound::Unbounded => true,
        Bound::Included(start) => position >= start,
        Bound::Excluded(start) => position > start,
    };
    let below = match to {
        Bound::Unbounded => true,
        Bound::Included(end) => position <= end,
        Bound::Excluded(end) => position < end,
    };

    above && below
}
