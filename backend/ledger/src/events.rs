//! # Events
//!
//! Producers append loosely typed field maps. Each consumer turns the map into
//! one of the typed records below exactly once, at the edge, so a missing or
//! malformed field surfaces as an [`EventError`] instead of a lookup failure
//! deep inside an aggregator.
//!
//! ## Streams
//! - `events:article:views`: [`ArticleView`]
//! - `events:search:queries`: [`SearchQuery`]
//! - `events:search:clicks`: [`SearchClick`]
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{error::EventError, position::LogPosition};

pub type Fields = HashMap<String, String>;

pub const VIEWS_STREAM: &str = "events:article:views";
pub const QUERIES_STREAM: &str = "events:search:queries";
pub const CLICKS_STREAM: &str = "events:search:clicks";

pub const EVENT_VERSION: &str = "v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    ArticleView,
    SearchQuery,
    SearchClick,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ArticleView => "article_view",
            EventType::SearchQuery => "search_query",
            EventType::SearchClick => "search_click",
        }
    }

    pub fn default_stream(&self) -> &'static str {
        match self {
            EventType::ArticleView => VIEWS_STREAM,
            EventType::SearchQuery => QUERIES_STREAM,
            EventType::SearchClick => CLICKS_STREAM,
        }
    }
}

/// A typed view over a stream entry's field map.
pub trait TypedEvent: Sized {
    const TYPE: EventType;

    fn from_fields(fields: &Fields) -> Result<Self, EventError>;

    fn to_fields(&self) -> Fields;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleView {
    pub article_id: String,
    #[serde(default)]
    pub article_title: String,
    #[serde(default)]
    pub user_id: String,
    pub session_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    pub term_original: String,
    pub term_normalized: String,
    pub results_total: u64,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user_id: String,
    pub session_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchClick {
    pub search_id: LogPosition,
    #[serde(default)]
    pub position: u32,
    pub article_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user_id: String,
    pub session_id: String,
}

fn required(fields: &Fields, name: &'static str) -> Result<String, EventError> {
    fields
        .get(name)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or(EventError::MissingField(name))
}

fn optional(fields: &Fields, name: &str) -> String {
    fields.get(name).cloned().unwrap_or_default()
}

fn parsed<T: std::str::FromStr>(fields: &Fields, name: &'static str) -> Result<T, EventError> {
    let raw = required(fields, name)?;
    raw.parse()
        .map_err(|_| EventError::InvalidField { field: name, value: raw })
}

fn versioned(pairs: Vec<(&str, String)>) -> Fields {
    let mut fields: Fields = pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    fields.insert("_version".to_string(), EVENT_VERSION.to_string());
    fields
}

impl TypedEvent for ArticleView {
    const TYPE: EventType = EventType::ArticleView;

    fn from_fields(fields: &Fields) -> Result<Self, EventError> {
        Ok(Self {
            article_id: required(fields, "article_id")?,
            article_title: optional(fields, "article_title"),
            user_id: optional(fields, "user_id"),
            session_id: required(fields, "session_id")?,
        })
    }

    fn to_fields(&self) -> Fields {
        versioned(vec![
            ("type", "view".to_string()),
            ("article_id", self.article_id.clone()),
            ("article_title", self.article_title.clone()),
            ("user_id", self.user_id.clone()),
            ("session_id", self.session_id.clone()),
        ])
    }
}

impl TypedEvent for SearchQuery {
    const TYPE: EventType = EventType::SearchQuery;

    fn from_fields(fields: &Fields) -> Result<Self, EventError> {
        Ok(Self {
            query: optional(fields, "query"),
            term_original: required(fields, "term_original")?,
            term_normalized: required(fields, "term_normalized")?,
            results_total: parsed(fields, "results_total")?,
            ip: optional(fields, "ip"),
            user_id: optional(fields, "user_id"),
            session_id: required(fields, "session_id")?,
        })
    }

    fn to_fields(&self) -> Fields {
        versioned(vec![
            ("type", "query".to_string()),
            ("query", self.query.clone()),
            ("term_original", self.term_original.clone()),
            ("term_normalized", self.term_normalized.clone()),
            ("results_total", self.results_total.to_string()),
            ("ip", self.ip.clone()),
            ("user_id", self.user_id.clone()),
            ("session_id", self.session_id.clone()),
        ])
    }
}

impl TypedEvent for SearchClick {
    const TYPE: EventType = EventType::SearchClick;

    fn from_fields(fields: &Fields) -> Result<Self, EventError> {
        let search_id = required(fields, "search_id")?;
        let search_id = search_id.parse().map_err(|_| EventError::InvalidField {
            field: "search_id",
            value: search_id,
        })?;

        Ok(Self {
            search_id,
            position: match fields.get("position") {
                Some(raw) if !raw.is_empty() => parsed(fields, "position")?,
                _ => 0,
            },
            article_id: required(fields, "article_id")?,
            ip: optional(fields, "ip"),
            user_id: optional(fields, "user_id"),
            session_id: required(fields, "session_id")?,
        })
    }

    fn to_fields(&self) -> Fields {
        versioned(vec![
            ("search_id", self.search_id.to_string()),
            ("position", self.position.to_string()),
            ("article_id", self.article_id.clone()),
            ("ip", self.ip.clone()),
            ("user_id", self.user_id.clone()),
            ("session_id", self.session_id.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_article_view_from_producer_fields() {
        let view = ArticleView::from_fields(&fields(&[
            ("_version", "v1"),
            ("type", "view"),
            ("article_id", "article:54a6"),
            ("article_title", "Signing into online banking"),
            ("user_id", ""),
            ("session_id", "f65f9d7f"),
        ]))
        .unwrap();

        assert_eq!(view.article_id, "article:54a6");
        assert_eq!(view.session_id, "f65f9d7f");
        assert_eq!(view.user_id, "");
    }

    #[test]
    fn test_missing_and_empty_fields_are_rejected() {
        assert_eq!(
            ArticleView::from_fields(&fields(&[("article_id", "a")])),
            Err(EventError::MissingField("session_id"))
        );
        assert_eq!(
            ArticleView::from_fields(&fields(&[("article_id", ""), ("session_id", "s")])),
            Err(EventError::MissingField("article_id"))
        );
    }

    #[test]
    fn test_search_query_requires_numeric_total() {
        let base = [
            ("term_original", "De"),
            ("term_normalized", "de*"),
            ("session_id", "s"),
        ];

        let mut good = fields(&base);
        good.insert("results_total".into(), "1189".into());
        assert_eq!(SearchQuery::from_fields(&good).unwrap().results_total, 1189);

        let mut bad = fields(&base);
        bad.insert("results_total".into(), "lots".into());
        assert_eq!(
            SearchQuery::from_fields(&bad),
            Err(EventError::InvalidField {
                field: "results_total",
                value: "lots".into()
            })
        );
    }

    #[test]
    fn test_search_click_parses_search_id() {
        let click = SearchClick::from_fields(&fields(&[
            ("search_id", "1589288437521-0"),
            ("position", "2"),
            ("article_id", "5857"),
            ("session_id", "bb1e"),
        ]))
        .unwrap();
        assert_eq!(click.search_id, LogPosition::new(1589288437521, 0));
        assert_eq!(click.position, 2);

        let err = SearchClick::from_fields(&fields(&[
            ("search_id", "not-a-position"),
            ("article_id", "5857"),
            ("session_id", "bb1e"),
        ]))
        .unwrap_err();
        assert!(matches!(err, EventError::InvalidField { field: "search_id", .. }));
    }

    #[test]
    fn test_to_fields_is_readable_back() {
        let query = SearchQuery {
            query: "@title|blurb|body:de*".into(),
            term_original: "de".into(),
            term_normalized: "de*".into(),
            results_total: 0,
            ip: "127.0.0.1".into(),
            user_id: "".into(),
            session_id: "7b9a".into(),
        };
        let fields = query.to_fields();
        assert_eq!(fields.get("_version").map(String::as_str), Some("v1"));
        assert_eq!(SearchQuery::from_fields(&fields).unwrap(), query);
    }
}
