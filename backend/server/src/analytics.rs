//! # Search Analytics
//!
//! Reports over `[start, end)`: totals, a gap-filled per-bucket graph and
//! the top ten terms, overall and among searches that found nothing. Every
//! number comes from a grouped aggregate over the analytics documents; the
//! six aggregates run concurrently.
use std::sync::Arc;

use ledger::{
    AnalyticsIndex,
    analytics::{AggregateRequest, AggregateRow, DocumentFilter, GroupBy, GroupKey, SortBy, TimeRange},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    utils::label,
    window::{BucketWidth, MAX_BUCKETS, WindowSeries},
};

pub const TOP_TERMS: usize = 10;

/// A validated window. Construction fails before anything is queried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowRequest {
    pub range: TimeRange,
    pub width: BucketWidth,
}

impl WindowRequest {
    pub fn new(start_ms: u64, end_ms: u64, width: BucketWidth) -> Result<Self, AppError> {
        if start_ms >= end_ms {
            return Err(AppError::BadRequest(
                "Window start must be before its end".to_string(),
            ));
        }

        let buckets = (end_ms - start_ms).div_ceil(width.millis());
        if buckets > MAX_BUCKETS {
            return Err(AppError::BadRequest(format!(
                "Window spans {buckets} buckets, at most {MAX_BUCKETS} allowed"
            )));
        }

        Ok(Self {
            range: TimeRange { start_ms, end_ms },
            width,
        })
    }

    fn aggregate(
        &self,
        filter: DocumentFilter,
        group_by: GroupBy,
        sort_by: SortBy,
        limit: Option<usize>,
    ) -> AggregateRequest {
        AggregateRequest {
            range: self.range,
            filter,
            group_by,
            sort_by,
            limit,
        }
    }

    fn buckets(&self) -> GroupBy {
        GroupBy::Bucket {
            origin_ms: self.range.start_ms,
            width_ms: self.width.millis(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub labels: Vec<String>,
    pub queries: Vec<u64>,
    pub clicks: Vec<u64>,
    pub no_results: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCount {
    pub term: String,
    pub queries: u64,
    pub clicks: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub start: String,
    pub end: String,
    pub bucket_secs: u64,
    pub total_queries: u64,
    pub total_no_results: u64,
    pub total_clicks: u64,
    pub graph: Graph,
    pub top_queries: Vec<TermCount>,
    pub top_queries_with_no_results: Vec<TermCount>,
}

fn total(rows: &[AggregateRow]) -> (u64, u64) {
    rows.iter()
        .fold((0, 0), |(queries, clicks), row| (queries + row.queries, clicks + row.clicks))
}

fn terms(rows: Vec<AggregateRow>) -> Vec<TermCount> {
    rows.into_iter()
        .filter_map(|row| match row.key {
            GroupKey::Term(term) => Some(TermCount {
                term,
                queries: row.queries,
                clicks: row.clicks,
            }),
            _ => None,
        })
        .take(TOP_TERMS)
        .collect()
}

#[derive(Clone)]
pub struct AnalyticsEngine {
    index: Arc<dyn AnalyticsIndex>,
}

impl AnalyticsEngine {
    pub fn new(index: Arc<dyn AnalyticsIndex>) -> Self {
        Self { index }
    }

    pub async fn report(&self, request: &WindowRequest) -> ledger::Result<AnalyticsReport> {
        use DocumentFilter::{All, NoResults};

        let totals = request.aggregate(All, GroupBy::Total, SortBy::Unsorted, None);
        let totals_no_results = request.aggregate(NoResults, GroupBy::Total, SortBy::Unsorted, None);
        let buckets = request.aggregate(All, request.buckets(), SortBy::KeyAscending, None);
        let buckets_no_results =
            request.aggregate(NoResults, request.buckets(), SortBy::KeyAscending, None);
        let top = request.aggregate(All, GroupBy::Term, SortBy::QueriesDescending, Some(TOP_TERMS));
        let top_no_results = request.aggregate(
            NoResults,
            GroupBy::Term,
            SortBy::QueriesDescending,
            Some(TOP_TERMS),
        );

        let (totals, totals_no_results, buckets, buckets_no_results, top, top_no_results) = tokio::try_join!(
            self.index.aggregate(&totals),
            self.index.aggregate(&totals_no_results),
            self.index.aggregate(&buckets),
            self.index.aggregate(&buckets_no_results),
            self.index.aggregate(&top),
            self.index.aggregate(&top_no_results),
        )?;

        let mut series = WindowSeries::zeroed(request.range, request.width);
        series.overlay(&buckets);
        series.overlay_no_results(&buckets_no_results);

        let (total_queries, total_clicks) = total(&totals);
        let (total_no_results, _) = total(&totals_no_results);

        Ok(AnalyticsReport {
            start: label(request.range.start_ms),
            end: label(request.range.end_ms),
            bucket_secs: request.width.secs(),
            total_queries,
            total_no_results,
            total_clicks,
            graph: Graph {
                labels: series.buckets.iter().map(|&bucket| label(bucket)).collect(),
                queries: series.queries,
                clicks: series.clicks,
                no_results: series.no_results,
            },
            top_queries: terms(top),
            top_queries_with_no_results: terms(top_no_results),
        })
    }
}
