//! Read and query surface of the news analytics pipeline.
//!
//!
//!
//! # General Infrastructure
//! - Producers (the site) append events to three Redis streams, directly or
//!   through the `/events/*` routes here
//! - `process` workers consume the streams and maintain the structures below
//! - This server only reads those structures, plus RediSearch aggregates
//!
//!
//!
//! # Routes
//!
//! | Method | Path | Returns |
//! |---|---|---|
//! | `GET` | `/recently-viewed/{session_id}` | Up to five article ids, newest first |
//! | `GET` | `/popular?limit=` | Most viewed articles as of the last rebuild, five by default |
//! | `GET` | `/analytics?start=&end=&bucket=` | Search analytics report over `[start, end)` |
//! | `POST` | `/events/views` | Appends an article view |
//! | `POST` | `/events/queries` | Appends a search query |
//! | `POST` | `/events/clicks` | Appends a search click |
//!
//! `start` and `end` take `YYYY-MM-DD` (midnight UTC) or RFC 3339; they
//! default to today and the day after. `bucket` is in seconds, truncated to
//! whole minutes, defaulting to `ANALYTICS_BUCKET_SECS`.
//!
//!
//!
//! # Notes
//!
//! ## Why aggregates and not counters
//! Per-bucket counters would have to be bumped by every worker for every
//! width anyone might ask for. Keeping one document per search and letting
//! RediSearch group by an aligned `ts` answers any width and range from the
//! same data, at the cost of a heavier query. Analytics is an occasional
//! dashboard request, so that trade is fine.
//!
//! ## Empty buckets
//! Aggregates only return groups that have documents. The graph is laid out
//! first with every bucket at zero and the rows are merged in, so gaps show
//! as zeros instead of disappearing.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Run the server with workers in-process.
//! ```sh
//! RUST_LOG=info cargo run -p newsroom --features workers
//! ```
use std::{future::Future, sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

pub mod analytics;
pub mod config;
pub mod error;
pub mod reads;
pub mod routes;
pub mod state;
pub mod utils;
pub mod window;

use routes::{
    analytics_handler, click_handler, popular_handler, query_handler, recently_viewed_handler,
    view_handler,
};
use state::State;

pub fn router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/recently-viewed/{session_id}", get(recently_viewed_handler))
        .route("/popular", get(popular_handler))
        .route("/analytics", get(analytics_handler))
        .route("/events/views", post(view_handler))
        .route("/events/queries", post(query_handler))
        .route("/events/clicks", post(click_handler))
        .layer(cors)
        .with_state(state)
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn start_server(
    state: Arc<State>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shut down");
    Ok(())
}
