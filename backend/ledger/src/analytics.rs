//! # Search Analytics Index
//!
//! One document per executed search, written by the query ingestion worker
//! and patched (only `clicks`) by the click worker. Reads are grouped
//! aggregates: the index does the filtering, grouping, counting, summing and
//! sorting, callers only describe what they want.
//!
//! ## Schema
//! - `term_original` text, sortable
//! - `term_normalized` text, sortable
//! - `results_total` numeric, sortable
//! - `ip`, `user_id`, `session_id` text
//! - `clicks` numeric, sortable
//! - `ts` numeric, sortable (milliseconds)
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::Result, events::SearchQuery, position::LogPosition};

pub const INDEX_NAME: &str = "analytics:search";
pub const DOCUMENT_PREFIX: &str = "analytics:search:";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsDocument {
    pub search_id: LogPosition,
    pub term_original: String,
    pub term_normalized: String,
    pub results_total: u64,
    pub ip: String,
    pub user_id: String,
    pub session_id: String,
    pub clicks: i64,
    pub ts: u64,
}

impl AnalyticsDocument {
    /// Document for the query appended at `position`; `ts` is the position's
    /// timestamp.
    pub fn from_query(position: LogPosition, query: SearchQuery) -> Self {
        Self {
            search_id: position,
            term_original: query.term_original,
            term_normalized: query.term_normalized,
            results_total: query.results_total,
            ip: query.ip,
            user_id: query.user_id,
            session_id: query.session_id,
            clicks: 0,
            ts: position.millis,
        }
    }
}

pub fn document_key(search_id: &LogPosition) -> String {
    format!("{DOCUMENT_PREFIX}query:{search_id}")
}

/// `[start_ms, end_ms)` over `ts`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimeRange {
    pub fn contains(&self, ts: u64) -> bool {
        ts >= self.start_ms && ts < self.end_ms
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFilter {
    All,
    /// `results_total == 0`
    NoResults,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupBy {
    /// A single group over every matching document.
    Total,
    /// `ts - ((ts - origin_ms) % width_ms)`
    Bucket { origin_ms: u64, width_ms: u64 },
    Term,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortBy {
    Unsorted,
    KeyAscending,
    QueriesDescending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateRequest {
    pub range: TimeRange,
    pub filter: DocumentFilter,
    pub group_by: GroupBy,
    pub sort_by: SortBy,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupKey {
    Total,
    Bucket(u64),
    Term(String),
}

/// One group: how many documents fell in it and the sum of their clicks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateRow {
    pub key: GroupKey,
    pub queries: u64,
    pub clicks: u64,
}

#[async_trait]
pub trait AnalyticsIndex: Send + Sync {
    /// Creates the index, dropping it first when `recreate` is set. Returns
    /// `false` when it already existed.
    async fn ensure_index(&self, recreate: bool) -> Result<bool>;

    /// Writes every field except `clicks`, which is only initialised when the
    /// document has none yet.
    async fn upsert_query(&self, document: &AnalyticsDocument) -> Result<()>;

    /// Sets `clicks` to an absolute value, creating a bare document if the
    /// query has not been ingested yet.
    async fn set_clicks(&self, search_id: &LogPosition, clicks: i64) -> Result<()>;

    /// The document, once its query has been ingested.
    async fn document(&self, search_id: &LogPosition) -> Result<Option<AnalyticsDocument>>;

    async fn aggregate(&self, request: &AggregateRequest) -> Result<Vec<AggregateRow>>;
}
