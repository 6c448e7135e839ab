//! Keeps each session's five most recently viewed articles.
//!
//! Members are scored by their view's log position, so a redelivered view
//! writes the same score again and a late redelivery never outranks a newer
//! view.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ledger::{ArticleView, RankedStore, StreamEntry, TypedEvent, keys};
use tracing::debug;

use crate::consumer::{HandleError, Handler};

pub const KEEP: usize = 5;
pub const TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct RecentlyViewed {
    store: Arc<dyn RankedStore>,
}

impl RecentlyViewed {
    pub fn new(store: Arc<dyn RankedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for RecentlyViewed {
    async fn handle(&self, entry: &StreamEntry) -> Result<(), HandleError> {
        let view = ArticleView::from_fields(&entry.fields)?;
        let key = keys::recently_viewed(&view.session_id);

        self.store
            .push_capped(&key, &view.article_id, entry.position.score(), KEEP, TTL)
            .await?;

        debug!("{} viewed {} at {}", view.session_id, view.article_id, entry.position);
        Ok(())
    }
}
