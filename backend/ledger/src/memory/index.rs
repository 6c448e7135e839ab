use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{
    analytics::{
        AggregateRequest, AggregateRow, AnalyticsDocument, AnalyticsIndex, DocumentFilter, GroupBy,
        GroupKey, SortBy,
    },
    error::Result,
    position::LogPosition,
};

/// Stored hash for one search: the ingested query fields (once they arrive)
/// and the mirrored click count (which may arrive first).
#[derive(Default)]
struct Stored {
    query: Option<AnalyticsDocument>,
    clicks: Option<i64>,
}

#[derive(Default)]
pub struct MemoryIndex {
    created: Mutex<bool>,
    documents: Mutex<HashMap<LogPosition, Stored>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<LogPosition, Stored>> {
        self.documents.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn group_key(group_by: GroupBy, document: &AnalyticsDocument) -> GroupKey {
        match group_by {
            GroupBy::Total => GroupKey::Total,
            GroupBy::Bucket {
                origin_ms,
                width_ms,
            } => {
                let offset = document.ts.saturating_sub(origin_ms) % width_ms.max(1);
                GroupKey::Bucket(document.ts - offset)
            }
            GroupBy::Term => GroupKey::Term(document.term_normalized.clone()),
        }
    }
}

#[async_trait]
impl AnalyticsIndex for MemoryIndex {
    async fn ensure_index(&self, recreate: bool) -> Result<bool> {
        let mut created = self.created.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = recreate || !*created;
        *created = true;
        Ok(fresh)
    }

    async fn upsert_query(&self, document: &AnalyticsDocument) -> Result<()> {
        let mut documents = self.documents();
        let stored = documents.entry(document.search_id).or_default();

        stored.query = Some(document.clone());
        stored.clicks.get_or_insert(document.clicks);
        Ok(())
    }

    async fn set_clicks(&self, search_id: &LogPosition, clicks: i64) -> Result<()> {
        self.documents().entry(*search_id).or_default().clicks = Some(clicks);
        Ok(())
    }

    async fn document(&self, search_id: &LogPosition) -> Result<Option<AnalyticsDocument>> {
        Ok(self.documents().get(search_id).and_then(|stored| {
            stored.query.clone().map(|query| AnalyticsDocument {
                clicks: stored.clicks.unwrap_or(query.clicks),
                ..query
            })
        }))
    }

    async fn aggregate(&self, request: &AggregateRequest) -> Result<Vec<AggregateRow>> {
        let documents = self.documents();
        let mut groups: BTreeMap<GroupKey, (u64, u64)> = BTreeMap::new();

        for stored in documents.values() {
            let Some(document) = &stored.query else {
                continue;
            };
            if !request.range.contains(document.ts) {
                continue;
            }
            if request.filter == DocumentFilter::NoResults && document.results_total != 0 {
                continue;
            }

            let clicks = stored.clicks.unwrap_or(0).max(0) as u64;
            let group = groups
                .entry(Self::group_key(request.group_by, document))
                .or_default();
            group.0 += 1;
            group.1 += clicks;
        }

        let mut rows = groups
            .into_iter()
            .map(|(key, (queries, clicks))| AggregateRow {
                key,
                queries,
                clicks,
            })
            .collect::<Vec<_>>();

        if request.sort_by == SortBy::QueriesDescending {
            rows.sort_by(|a, b| b.queries.cmp(&a.queries).then_with(|| a.key.cmp(&b.key)));
        }
        if let Some(limit) = request.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::TimeRange;

    fn document(millis: u64, term: &str, results_total: u64) -> AnalyticsDocument {
        AnalyticsDocument {
            search_id: LogPosition::new(millis, 0),
            term_original: term.to_string(),
            term_normalized: term.to_string(),
            results_total,
            ip: "127.0.0.1".to_string(),
            user_id: String::new(),
            session_id: "s".to_string(),
            clicks: 0,
            ts: millis,
        }
    }

    fn request(group_by: GroupBy, sort_by: SortBy) -> AggregateRequest {
        AggregateRequest {
            range: TimeRange {
                start_ms: 1_000,
                end_ms: 10_000,
            },
            filter: DocumentFilter::All,
            group_by,
            sort_by,
            limit: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_clicks_that_arrived_first() {
        let index = MemoryIndex::new();
        let doc = document(2_000, "rust", 3);

        index.set_clicks(&doc.search_id, 4).await.unwrap();
        assert_eq!(index.document(&doc.search_id).await.unwrap(), None);

        index.upsert_query(&doc).await.unwrap();
        index.upsert_query(&doc).await.unwrap();
        assert_eq!(index.document(&doc.search_id).await.unwrap().unwrap().clicks, 4);
    }

    #[tokio::test]
    async fn test_range_is_half_open() {
        let index = MemoryIndex::new();
        for millis in [999, 1_000, 9_999, 10_000] {
            index.upsert_query(&document(millis, "t", 1)).await.unwrap();
        }

        let rows = index
            .aggregate(&request(GroupBy::Total, SortBy::Unsorted))
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![AggregateRow {
                key: GroupKey::Total,
                queries: 2,
                clicks: 0
            }]
        );
    }

    #[tokio::test]
    async fn test_buckets_align_to_origin() {
        let index = MemoryIndex::new();
        for millis in [1_000, 1_500, 3_200, 3_999] {
            index.upsert_query(&document(millis, "t", 1)).await.unwrap();
        }

        let rows = index
            .aggregate(&request(
                GroupBy::Bucket {
                    origin_ms: 1_000,
                    width_ms: 1_000,
                },
                SortBy::KeyAscending,
            ))
            .await
            .unwrap();

        let buckets = rows
            .iter()
            .map(|row| (row.key.clone(), row.queries))
            .collect::<Vec<_>>();
        assert_eq!(
            buckets,
            vec![(GroupKey::Bucket(1_000), 2), (GroupKey::Bucket(3_000), 2)]
        );
    }

    #[tokio::test]
    async fn test_no_result_filter_and_term_limit() {
        let index = MemoryIndex::new();
        for (n, term) in ["a", "a", "b", "c", "c", "c"].iter().enumerate() {
            index
                .upsert_query(&document(2_000 + n as u64, term, 0))
                .await
                .unwrap();
        }
        index.upsert_query(&document(3_000, "c", 10)).await.unwrap();

        let mut top = request(GroupBy::Term, SortBy::QueriesDescending);
        top.filter = DocumentFilter::NoResults;
        top.limit = Some(2);

        let rows = index.aggregate(&top).await.unwrap();
        assert_eq!(
            rows.iter()
                .map(|row| (row.key.clone(), row.queries))
                .collect::<Vec<_>>(),
            vec![
                (GroupKey::Term("c".into()), 3),
                (GroupKey::Term("a".into()), 2)
            ]
        );
    }

    #[tokio::test]
    async fn test_ensure_index_reports_creation() {
        let index = MemoryIndex::new();
        assert!(index.ensure_index(false).await.unwrap());
        assert!(!index.ensure_index(false).await.unwrap());
        assert!(index.ensure_index(true).await.unwrap());
    }
}
