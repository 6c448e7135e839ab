use std::collections::HashMap;

use async_trait::async_trait;
use redis::{AsyncCommands, ErrorKind, Value, aio::ConnectionManager, cmd, from_redis_value, pipe};
use tracing::{info, warn};

use crate::{
    analytics::{
        AggregateRequest, AggregateRow, AnalyticsDocument, AnalyticsIndex, DOCUMENT_PREFIX,
        DocumentFilter, GroupBy, GroupKey, INDEX_NAME, SortBy, document_key,
    },
    error::{LedgerError, Result},
    position::LogPosition,
};

const SCHEMA: &[&str] = &[
    "term_original", "TEXT", "SORTABLE",
    "term_normalized", "TEXT", "SORTABLE",
    "results_total", "NUMERIC", "SORTABLE",
    "ip", "TEXT",
    "user_id", "TEXT",
    "session_id", "TEXT",
    "clicks", "NUMERIC", "SORTABLE",
    "ts", "NUMERIC", "SORTABLE",
];

pub struct RedisIndex {
    connection: ConnectionManager,
}

impl RedisIndex {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

fn push(args: &mut Vec<String>, parts: &[&str]) {
    args.extend(parts.iter().map(|part| part.to_string()));
}

/// `FT.AGGREGATE` arguments for a request; every group reports `queries`
/// (document count) and `clicks` (sum of clicks).
fn aggregate_args(request: &AggregateRequest) -> Vec<String> {
    let mut query = format!(
        "@ts:[{} ({}]",
        request.range.start_ms, request.range.end_ms
    );
    if request.filter == DocumentFilter::NoResults {
        query.push_str(" @results_total:[0 0]");
    }

    let mut args = vec![INDEX_NAME.to_string(), query];

    let key_field = match request.group_by {
        GroupBy::Total => {
            push(&mut args, &["GROUPBY", "0"]);
            None
        }
        GroupBy::Bucket {
            origin_ms,
            width_ms,
        } => {
            let expression = format!("@ts - ((@ts - {origin_ms}) % {width_ms})");
            push(&mut args, &["LOAD", "1", "@ts", "APPLY", expression.as_str(), "AS", "bucket"]);
            push(&mut args, &["GROUPBY", "1", "@bucket"]);
            Some("@bucket")
        }
        GroupBy::Term => {
            push(&mut args, &["GROUPBY", "1", "@term_normalized"]);
            Some("@term_normalized")
        }
    };

    push(&mut args, &["REDUCE", "COUNT", "0", "AS", "queries"]);
    push(&mut args, &["REDUCE", "SUM", "1", "@clicks", "AS", "clicks"]);

    match (request.sort_by, key_field) {
        (SortBy::KeyAscending, Some(field)) => push(&mut args, &["SORTBY", "2", field, "ASC"]),
        (SortBy::QueriesDescending, _) => push(&mut args, &["SORTBY", "2", "@queries", "DESC"]),
        _ => {}
    }

    if let Some(limit) = request.limit {
        push(&mut args, &["LIMIT", "0", limit.to_string().as_str()]);
    }

    args
}

fn number(row: &HashMap<String, String>, field: &str) -> Result<f64> {
    match row.get(field) {
        None => Ok(0.0),
        Some(raw) => raw
            .parse()
            .map_err(|_| LedgerError::UnexpectedReply(format!("{field} = {raw:?}"))),
    }
}

/// Reply shape: `[total, [field, value, ...], ...]`.
fn parse_rows(reply: Value, group_by: GroupBy) -> Result<Vec<AggregateRow>> {
    let Value::Array(items) = reply else {
        return Err(LedgerError::UnexpectedReply(format!("{reply:?}")));
    };

    items
        .iter()
        .skip(1)
        .map(|item| {
            let pairs: Vec<String> = from_redis_value(item)?;
            let row = pairs
                .chunks_exact(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect::<HashMap<_, _>>();

            let key = match group_by {
                GroupBy::Total => GroupKey::Total,
                GroupBy::Bucket { .. } => GroupKey::Bucket(number(&row, "bucket")?.round() as u64),
                GroupBy::Term => GroupKey::Term(
                    row.get("term_normalized").cloned().unwrap_or_default(),
                ),
            };

            Ok(AggregateRow {
                key,
                queries: number(&row, "queries")? as u64,
                clicks: number(&row, "clicks")?.max(0.0) as u64,
            })
        })
        .collect()
}

fn document_from_hash(search_id: &LogPosition, hash: HashMap<String, String>) -> Option<AnalyticsDocument> {
    let text = |field: &str| hash.get(field).cloned().unwrap_or_default();
    let numeric = |field: &str| hash.get(field).and_then(|raw| raw.parse().ok());

    Some(AnalyticsDocument {
        search_id: *search_id,
        term_original: text("term_original"),
        term_normalized: text("term_normalized"),
        results_total: numeric("results_total").unwrap_or(0),
        ip: text("ip"),
        user_id: text("user_id"),
        session_id: text("session_id"),
        clicks: hash.get("clicks").and_then(|raw| raw.parse().ok()).unwrap_or(0),
        ts: numeric("ts")?,
    })
}

#[async_trait]
impl AnalyticsIndex for RedisIndex {
    async fn ensure_index(&self, recreate: bool) -> Result<bool> {
        let mut connection = self.connection.clone();

        if recreate {
            let dropped: redis::RedisResult<()> = cmd("FT.DROPINDEX")
                .arg(INDEX_NAME)
                .query_async(&mut connection)
                .await;
            if let Err(e) = dropped {
                if e.kind() != ErrorKind::ResponseError {
                    return Err(e.into());
                }
                warn!("Dropping index {INDEX_NAME} failed: {e}");
            }
        }

        let created: redis::RedisResult<()> = cmd("FT.CREATE")
            .arg(INDEX_NAME)
            .arg(vec!["ON", "HASH", "PREFIX", "1", DOCUMENT_PREFIX, "SCHEMA"])
            .arg(SCHEMA.to_vec())
            .query_async(&mut connection)
            .await;

        match created {
            Ok(()) => {
                info!("Created index {INDEX_NAME}");
                Ok(true)
            }
            Err(e) if e.to_string().contains("already exists") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert_query(&self, document: &AnalyticsDocument) -> Result<()> {
        let key = document_key(&document.search_id);
        let fields = [
            ("term_original", document.term_original.clone()),
            ("term_normalized", document.term_normalized.clone()),
            ("results_total", document.results_total.to_string()),
            ("ip", document.ip.clone()),
            ("user_id", document.user_id.clone()),
            ("session_id", document.session_id.clone()),
            ("ts", document.ts.to_string()),
        ];

        let mut connection = self.connection.clone();
        pipe()
            .atomic()
            .hset_multiple(&key, &fields)
            .ignore()
            .hset_nx(&key, "clicks", document.clicks)
            .ignore()
            .query_async::<()>(&mut connection)
            .await?;

        Ok(())
    }

    async fn set_clicks(&self, search_id: &LogPosition, clicks: i64) -> Result<()> {
        let mut connection = self.connection.clone();
        connection
            .hset::<_, _, _, ()>(document_key(search_id), "clicks", clicks)
            .await?;
        Ok(())
    }

    async fn document(&self, search_id: &LogPosition) -> Result<Option<AnalyticsDocument>> {
        let mut connection = self.connection.clone();
        let hash: HashMap<String, String> = connection.hgetall(document_key(search_id)).await?;

        Ok(document_from_hash(search_id, hash))
    }

    async fn aggregate(&self, request: &AggregateRequest) -> Result<Vec<AggregateRow>> {
        let mut connection = self.connection.clone();
        let reply: Value = cmd("FT.AGGREGATE")
            .arg(aggregate_args(request))
            .query_async(&mut connection)
            .await?;

        parse_rows(reply, request.group_by)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::TimeRange;

    fn request(group_by: GroupBy, sort_by: SortBy) -> AggregateRequest {
        AggregateRequest {
            range: TimeRange {
                start_ms: 1_000,
                end_ms: 2_000,
            },
            filter: DocumentFilter::All,
            group_by,
            sort_by,
            limit: None,
        }
    }

    fn bulk(parts: &[&str]) -> Value {
        Value::Array(
            parts
                .iter()
                .map(|part| Value::BulkString(part.as_bytes().to_vec()))
                .collect(),
        )
    }

    #[test]
    fn test_total_args() {
        let args = aggregate_args(&request(GroupBy::Total, SortBy::Unsorted));
        assert_eq!(
            args.join(" "),
            "analytics:search @ts:[1000 (2000] GROUPBY 0 \
             REDUCE COUNT 0 AS queries REDUCE SUM 1 @clicks AS clicks"
        );
    }

    #[test]
    fn test_bucket_args_align_to_origin() {
        let args = aggregate_args(&request(
            GroupBy::Bucket {
                origin_ms: 1_000,
                width_ms: 60_000,
            },
            SortBy::KeyAscending,
        ));
        let joined = args.join(" ");
        assert!(joined.contains("APPLY @ts - ((@ts - 1000) % 60000) AS bucket GROUPBY 1 @bucket"));
        assert!(joined.ends_with("SORTBY 2 @bucket ASC"));
    }

    #[test]
    fn test_top_terms_args() {
        let mut top = request(GroupBy::Term, SortBy::QueriesDescending);
        top.filter = DocumentFilter::NoResults;
        top.limit = Some(10);

        let joined = aggregate_args(&top).join(" ");
        assert!(joined.starts_with("analytics:search @ts:[1000 (2000] @results_total:[0 0]"));
        assert!(joined.ends_with("SORTBY 2 @queries DESC LIMIT 0 10"));
    }

    #[test]
    fn test_parse_rows() {
        let reply = Value::Array(vec![
            Value::Int(2),
            bulk(&["term_normalized", "rust", "queries", "5", "clicks", "2"]),
            bulk(&["term_normalized", "tokio", "queries", "3"]),
        ]);

        let rows = parse_rows(reply, GroupBy::Term).unwrap();
        assert_eq!(
            rows,
            vec![
                AggregateRow {
                    key: GroupKey::Term("rust".into()),
                    queries: 5,
                    clicks: 2
                },
                AggregateRow {
                    key: GroupKey::Term("tokio".into()),
                    queries: 3,
                    clicks: 0
                },
            ]
        );
    }

    #[test]
    fn test_parse_bucket_in_exponent_form() {
        let reply = Value::Array(vec![
            Value::Int(1),
            bulk(&["bucket", "1.5892884e+12", "queries", "4", "clicks", "1"]),
        ]);

        let rows = parse_rows(reply, GroupBy::Bucket { origin_ms: 0, width_ms: 1 }).unwrap();
        assert_eq!(rows[0].key, GroupKey::Bucket(1_589_288_400_000));
    }

    #[test]
    fn test_bare_click_hash_is_not_a_document() {
        let search_id = LogPosition::new(5, 0);
        let bare = HashMap::from([("clicks".to_string(), "3".to_string())]);
        assert_eq!(document_from_hash(&search_id, bare), None);

        let full = HashMap::from([
            ("term_normalized".to_string(), "rust".to_string()),
            ("results_total".to_string(), "3".to_string()),
            ("clicks".to_string(), "3".to_string()),
            ("ts".to_string(), "5".to_string()),
        ]);
        let document = document_from_hash(&search_id, full).unwrap();
        assert_eq!(document.clicks, 3);
        assert_eq!(document.ts, 5);
    }
}
