//! Appends a small scripted set of events to the three streams.
use anyhow::Context;
use ledger::{
    ArticleView, Backends, SearchClick, SearchQuery,
    config::StoreConfig,
    events::{CLICKS_STREAM, QUERIES_STREAM, VIEWS_STREAM},
    log::append_event,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

const ARTICLES: [(&str, &str); 3] = [
    ("a-101", "Council approves new bike lanes"),
    ("a-102", "Storm closes coastal roads"),
    ("a-103", "Local team wins final"),
];

const TERMS: [(&str, u64); 4] = [("Bike Lanes", 4), ("storm", 2), ("final score", 1), ("zebra", 0)];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = StoreConfig::load()?;
    let backends = Backends::redis(&config.redis_url, &config.redis, std::time::Duration::ZERO)
        .await
        .context("Failed to connect to Redis")?;
    let log = backends.log.as_ref();

    let views = [0, 0, 0, 1, 2, 1];
    for (i, &article) in views.iter().enumerate() {
        let (article_id, article_title) = ARTICLES[article];
        let view = ArticleView {
            article_id: article_id.to_string(),
            article_title: article_title.to_string(),
            user_id: String::new(),
            session_id: format!("session-{}", i % 2),
        };
        append_event(log, VIEWS_STREAM, &view).await?;
    }
    info!("Appended {} views", views.len());

    let mut clicks = 0;
    for (i, (term, results_total)) in TERMS.iter().enumerate() {
        let query = SearchQuery {
            query: term.to_string(),
            term_original: term.to_string(),
            term_normalized: term.to_lowercase(),
            results_total: *results_total,
            ip: "127.0.0.1".to_string(),
            user_id: String::new(),
            session_id: format!("session-{}", i % 2),
        };
        let search_id = append_event(log, QUERIES_STREAM, &query).await?;

        if *results_total > 0 {
            let click = SearchClick {
                search_id,
                position: 1,
                article_id: ARTICLES[i % ARTICLES.len()].0.to_string(),
                ip: "127.0.0.1".to_string(),
                user_id: String::new(),
                session_id: query.session_id.clone(),
            };
            append_event(log, CLICKS_STREAM, &click).await?;
            clicks += 1;
        }
    }
    info!("Appended {} queries and {clicks} clicks", TERMS.len());

    Ok(())
}
