//! Gap-filled time series: every bucket in the window is laid out first,
//! zeroed, and aggregate rows are merged in by bucket start.
use ledger::analytics::{AggregateRow, GroupKey, TimeRange};

use crate::error::AppError;

/// Most buckets a single window may span.
pub const MAX_BUCKETS: u64 = 10_000;

/// Widest bucket accepted, a leap year.
pub const MAX_WIDTH_SECS: u64 = 366 * 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketWidth {
    millis: u64,
}

impl BucketWidth {
    /// Truncates to whole minutes; anything under a minute or over
    /// [`MAX_WIDTH_SECS`] is rejected.
    pub fn from_secs(secs: u64) -> Result<Self, AppError> {
        let minutes = secs / 60;
        if minutes == 0 {
            return Err(AppError::BadRequest(format!(
                "Bucket width must be at least 60 seconds, got {secs}"
            )));
        }

        match minutes.checked_mul(60_000) {
            Some(millis) if secs <= MAX_WIDTH_SECS => Ok(Self { millis }),
            _ => Err(AppError::BadRequest(format!(
                "Bucket width must be at most {MAX_WIDTH_SECS} seconds, got {secs}"
            ))),
        }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn secs(&self) -> u64 {
        self.millis / 1000
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSeries {
    /// Start of each bucket, ascending.
    pub buckets: Vec<u64>,
    pub queries: Vec<u64>,
    pub clicks: Vec<u64>,
    pub no_results: Vec<u64>,
}

impl WindowSeries {
    /// Buckets `start, start + width, ...` up to (excluding) `end`.
    pub fn zeroed(range: TimeRange, width: BucketWidth) -> Self {
        let buckets: Vec<u64> = (range.start_ms..range.end_ms)
            .step_by(width.millis() as usize)
            .collect();
        let len = buckets.len();

        Self {
            buckets,
            queries: vec![0; len],
            clicks: vec![0; len],
            no_results: vec![0; len],
        }
    }

    fn slot(&self, key: &GroupKey) -> Option<usize> {
        let GroupKey::Bucket(start) = key else {
            return None;
        };
        self.buckets.binary_search(start).ok()
    }

    pub fn overlay(&mut self, rows: &[AggregateRow]) {
        for row in rows {
            if let Some(slot) = self.slot(&row.key) {
                self.queries[slot] = row.queries;
                self.clicks[slot] = row.clicks;
            }
        }
    }

    pub fn overlay_no_results(&mut self, rows: &[AggregateRow]) {
        for row in rows {
            if let Some(slot) = self.slot(&row.key) {
                self.no_results[slot] = row.queries;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u64 = 60 * 60 * 1000;

    fn row(bucket: u64, queries: u64, clicks: u64) -> AggregateRow {
        AggregateRow {
            key: GroupKey::Bucket(bucket),
            queries,
            clicks,
        }
    }

    #[test]
    fn test_width_is_whole_minutes() {
        assert_eq!(BucketWidth::from_secs(90).unwrap().millis(), 60_000);
        assert_eq!(BucketWidth::from_secs(3600).unwrap().secs(), 3600);
        assert!(BucketWidth::from_secs(59).is_err());
        assert!(BucketWidth::from_secs(MAX_WIDTH_SECS).is_ok());
        assert!(BucketWidth::from_secs(MAX_WIDTH_SECS + 60).is_err());
        assert!(matches!(
            BucketWidth::from_secs(u64::MAX),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_missing_buckets_stay_zero() {
        let start = 1_704_153_600_000;
        let range = TimeRange {
            start_ms: start,
            end_ms: start + 3 * HOUR,
        };
        let mut series = WindowSeries::zeroed(range, BucketWidth::from_secs(3600).unwrap());

        series.overlay(&[row(start, 4, 1), row(start + 2 * HOUR, 2, 0)]);
        series.overlay_no_results(&[row(start + 2 * HOUR, 1, 0)]);

        assert_eq!(series.buckets, vec![start, start + HOUR, start + 2 * HOUR]);
        assert_eq!(series.queries, vec![4, 0, 2]);
        assert_eq!(series.clicks, vec![1, 0, 0]);
        assert_eq!(series.no_results, vec![0, 0, 1]);
    }

    #[test]
    fn test_partial_last_bucket_is_kept() {
        let range = TimeRange {
            start_ms: 0,
            end_ms: 90 * 60_000,
        };
        let series = WindowSeries::zeroed(range, BucketWidth::from_secs(3600).unwrap());

        assert_eq!(series.buckets, vec![0, HOUR]);
    }

    #[test]
    fn test_rows_outside_window_are_ignored() {
        let range = TimeRange {
            start_ms: 0,
            end_ms: HOUR,
        };
        let mut series = WindowSeries::zeroed(range, BucketWidth::from_secs(3600).unwrap());
        series.overlay(&[row(5 * HOUR, 9, 9), row(1, 9, 9)]);

        assert_eq!(series.queries, vec![0]);
    }
}
