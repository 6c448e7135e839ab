//! Redis key names shared by the writers (workers) and readers (server).
use crate::position::LogPosition;

/// Global leaderboard; braces keep its staging copies in the same cluster slot.
pub const POPULAR_ARTICLES: &str = "{popular_articles}";

pub fn recently_viewed(session_id: &str) -> String {
    format!("recently_viewed:{session_id}")
}

pub fn clicks(search_id: &LogPosition) -> String {
    format!("clicks:{search_id}")
}

pub fn popular_staging(token: &str) -> String {
    format!("{POPULAR_ARTICLES}:{token}")
}
