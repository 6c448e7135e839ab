//! Read side of the ranked structures the workers maintain.
use ledger::{RankedStore, keys};
use serde::{Deserialize, Serialize};

pub const RECENTLY_VIEWED: usize = 5;
pub const DEFAULT_POPULAR: usize = 5;

/// Article ids, most recently viewed first.
pub async fn recently_viewed(
    store: &dyn RankedStore,
    session_id: &str,
) -> ledger::Result<Vec<String>> {
    let members = store
        .top(&keys::recently_viewed(session_id), Some(RECENTLY_VIEWED))
        .await?;

    Ok(members.into_iter().map(|(article_id, _)| article_id).collect())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularArticle {
    pub article_id: String,
    pub views: u64,
}

/// Most viewed articles as of the last rebuild.
pub async fn popular(store: &dyn RankedStore, limit: usize) -> ledger::Result<Vec<PopularArticle>> {
    let members = store.top(keys::POPULAR_ARTICLES, Some(limit)).await?;

    Ok(members
        .into_iter()
        .map(|(article_id, views)| PopularArticle {
            article_id,
            views: views.max(0.0) as u64,
        })
        .collect())
}
