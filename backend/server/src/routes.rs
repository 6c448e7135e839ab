use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State as AxumState},
};
use ledger::{
    ArticleView, EventLog, LogPosition, SearchClick, SearchQuery, TypedEvent, events::EventType,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    analytics::{AnalyticsReport, WindowRequest},
    error::AppError,
    reads::{self, DEFAULT_POPULAR, PopularArticle},
    state::State,
    utils::{DAY_MS, parse_instant, today_ms},
    window::BucketWidth,
};

#[derive(Deserialize, Debug, Default)]
pub struct AnalyticsParams {
    pub start: Option<String>,
    pub end: Option<String>,
    /// Bucket width in seconds.
    pub bucket: Option<String>,
}

pub async fn analytics_handler(
    AxumState(state): AxumState<Arc<State>>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<AnalyticsReport>, AppError> {
    let start = match params.start.as_deref() {
        Some(raw) => parse_instant(raw)?,
        None => today_ms(),
    };
    let end = match params.end.as_deref() {
        Some(raw) => parse_instant(raw)?,
        None => start + DAY_MS,
    };
    let bucket_secs = match params.bucket.as_deref() {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::BadRequest(format!("Invalid bucket width {raw:?}")))?,
        None => state.config.bucket.as_secs(),
    };

    let request = WindowRequest::new(start, end, BucketWidth::from_secs(bucket_secs)?)?;
    let report = state.analytics.report(&request).await?;

    Ok(Json(report))
}

pub async fn recently_viewed_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let articles = reads::recently_viewed(state.backends.store.as_ref(), &session_id).await?;

    Ok(Json(articles))
}

#[derive(Deserialize, Debug, Default)]
pub struct PopularParams {
    pub limit: Option<usize>,
}

pub async fn popular_handler(
    AxumState(state): AxumState<Arc<State>>,
    Query(params): Query<PopularParams>,
) -> Result<Json<Vec<PopularArticle>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_POPULAR).clamp(1, 100);
    let articles = reads::popular(state.backends.store.as_ref(), limit).await?;

    Ok(Json(articles))
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Appended {
    pub id: LogPosition,
}

/// Parses the body as `E`, checks it through its field form and appends it.
async fn append<E: TypedEvent + DeserializeOwned>(
    state: &State,
    body: &Bytes,
) -> Result<Json<Appended>, AppError> {
    let event: E = serde_json::from_slice(body).map_err(|_| AppError::MalformedPayload)?;
    let fields = event.to_fields();
    E::from_fields(&fields).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let stream = match E::TYPE {
        EventType::ArticleView => &state.config.views_stream,
        EventType::SearchQuery => &state.config.queries_stream,
        EventType::SearchClick => &state.config.clicks_stream,
    };
    let id = state.backends.log.append(stream, &fields).await?;
    debug!("Appended {} {id} to {stream}", E::TYPE.as_str());

    Ok(Json(Appended { id }))
}

pub async fn view_handler(
    AxumState(state): AxumState<Arc<State>>,
    body: Bytes,
) -> Result<Json<Appended>, AppError> {
    append::<ArticleView>(&state, &body).await
}

pub async fn query_handler(
    AxumState(state): AxumState<Arc<State>>,
    body: Bytes,
) -> Result<Json<Appended>, AppError> {
    append::<SearchQuery>(&state, &body).await
}

pub async fn click_handler(
    AxumState(state): AxumState<Arc<State>>,
    body: Bytes,
) -> Result<Json<Appended>, AppError> {
    append::<SearchClick>(&state, &body).await
}
